//! Per-namespace reverse index mapping compiled label selectors back to the
//! source-Service name that owns them, used only to translate pod events
//! into reconcile keys. Bounded and LRU-evicted per namespace.

use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
struct Entry {
    selector: BTreeMap<String, String>,
    last_access: std::time::Instant,
}

/// Bounded per-namespace cache of `service name -> selector`.
pub struct PodIndex {
    namespaces: RwLock<HashMap<String, HashMap<String, Entry>>>,
    cap_per_namespace: usize,
}

impl PodIndex {
    pub fn new(cap_per_namespace: usize) -> Self {
        PodIndex {
            namespaces: RwLock::new(HashMap::new()),
            cap_per_namespace,
        }
    }

    /// Inserts or refreshes the selector for `(namespace, service_name)`.
    pub async fn upsert(&self, namespace: &str, service_name: &str, selector: BTreeMap<String, String>) {
        let mut guard = self.namespaces.write().await;
        let ns_map = guard.entry(namespace.to_string()).or_default();
        ns_map.insert(
            service_name.to_string(),
            Entry {
                selector,
                last_access: std::time::Instant::now(),
            },
        );
        if ns_map.len() > self.cap_per_namespace {
            evict_lru(ns_map);
        }
    }

    /// Removes the entry for `(namespace, service_name)`, if present.
    pub async fn remove(&self, namespace: &str, service_name: &str) {
        let mut guard = self.namespaces.write().await;
        if let Some(ns_map) = guard.get_mut(namespace) {
            ns_map.remove(service_name);
        }
    }

    /// Returns every source-Service name in `namespace` whose cached
    /// selector matches `labels`, updating last-access on each hit.
    pub async fn matching_services(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Vec<String> {
        {
            let guard = self.namespaces.read().await;
            if let Some(ns_map) = guard.get(namespace) {
                let hits: Vec<String> = ns_map
                    .iter()
                    .filter(|(_, entry)| selector_matches(&entry.selector, labels))
                    .map(|(name, _)| name.clone())
                    .collect();
                if !hits.is_empty() {
                    drop(guard);
                    let mut write_guard = self.namespaces.write().await;
                    if let Some(ns_map) = write_guard.get_mut(namespace) {
                        let now = std::time::Instant::now();
                        for name in &hits {
                            if let Some(e) = ns_map.get_mut(name) {
                                e.last_access = now;
                            }
                        }
                    }
                    return hits;
                }
            }
        }
        Vec::new()
    }

    /// Number of cached entries in `namespace`, for the cache-size metric.
    pub async fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// A `(namespace, entry count)` snapshot of every namespace currently
    /// tracked, for the periodic `cache-size` gauge refresh.
    pub async fn namespace_sizes(&self) -> Vec<(String, usize)> {
        self.namespaces
            .read()
            .await
            .iter()
            .map(|(ns, m)| (ns.clone(), m.len()))
            .collect()
    }
}

fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    !selector.is_empty() && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

fn evict_lru(ns_map: &mut HashMap<String, Entry>) {
    if let Some(oldest_key) = ns_map
        .iter()
        .min_by_key(|(_, e)| e.last_access)
        .map(|(k, _)| k.clone())
    {
        ns_map.remove(&oldest_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn matches_on_insert_and_by_labels() {
        let index = PodIndex::new(10);
        index.upsert("ns", "svc-a", sel(&[("app", "demo")])).await;
        let hits = index.matching_services("ns", &sel(&[("app", "demo"), ("tier", "x")])).await;
        assert_eq!(hits, vec!["svc-a".to_string()]);
    }

    #[tokio::test]
    async fn no_match_for_other_namespace() {
        let index = PodIndex::new(10);
        index.upsert("ns-a", "svc-a", sel(&[("app", "demo")])).await;
        let hits = index.matching_services("ns-b", &sel(&[("app", "demo")])).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let index = PodIndex::new(10);
        index.upsert("ns", "svc-a", sel(&[("app", "demo")])).await;
        index.remove("ns", "svc-a").await;
        let hits = index.matching_services("ns", &sel(&[("app", "demo")])).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn evicts_least_recently_accessed_over_cap() {
        let index = PodIndex::new(2);
        index.upsert("ns", "svc-a", sel(&[("app", "a")])).await;
        index.upsert("ns", "svc-b", sel(&[("app", "b")])).await;
        // touch svc-a so svc-b becomes the LRU victim on the next insert
        index.matching_services("ns", &sel(&[("app", "a")])).await;
        index.upsert("ns", "svc-c", sel(&[("app", "c")])).await;
        assert_eq!(index.len("ns").await, 2);
        assert!(index
            .matching_services("ns", &sel(&[("app", "a")]))
            .await
            .contains(&"svc-a".to_string()));
        assert!(index
            .matching_services("ns", &sel(&[("app", "c")]))
            .await
            .contains(&"svc-c".to_string()));
    }
}
