//! Translates Service/Pod/EndpointSlice watch events into reconcile keys,
//! and enqueues them into a bounded channel drained by the reconcile
//! worker pool. Pod events pass through an admission predicate first so a
//! keepalive heartbeat doesn't trigger a reconcile.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, ResourceExt};
use leaderslice_shared::k8s::api::Api as ApiTrait;
use leaderslice_shared::k8s::pod::{is_ready, is_terminating, pod_ip};
use leaderslice_shared::system::{LABEL_MANAGED_BY, LABEL_SOURCE_SERVICE, MANAGED_BY_VALUE};
use tokio::sync::mpsc::Sender;

use crate::util::annotations;
use crate::util::controller_ctx::Context;
use crate::util::metrics as m;
use crate::util::ControllerError;

pub type ReconcileKey = (String, String);

#[derive(Clone, Debug, Default)]
struct ObservedPodState {
    ready: bool,
    terminating: bool,
    has_ip: bool,
    phase: String,
}

impl ObservedPodState {
    fn from_pod(pod: &Pod) -> Self {
        ObservedPodState {
            ready: is_ready(pod),
            terminating: is_terminating(pod),
            has_ip: pod_ip(pod).is_some(),
            phase: pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_default(),
        }
    }

    fn is_terminal_phase(&self) -> bool {
        self.phase == "Failed" || self.phase == "Succeeded"
    }
}

/// True if transitioning from `before` to `after` is "meaningful" per the
/// pod-event admission predicate: Ready flip, deletion timestamp flip, IP
/// assignment change, or crossing into/out of a terminal phase.
fn is_meaningful_transition(before: &ObservedPodState, after: &ObservedPodState) -> bool {
    before.ready != after.ready
        || before.terminating != after.terminating
        || before.has_ip != after.has_ip
        || before.is_terminal_phase() != after.is_terminal_phase()
}

/// Watches source Services: every create/update/delete is always admitted.
pub async fn watch_services(
    api: Api<Service>,
    tx: Sender<ReconcileKey>,
) -> crate::util::Result<()> {
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    while let Some(event) = stream.try_next().await.map_err(ControllerError::from)? {
        match event {
            watcher::Event::Apply(svc) | watcher::Event::Delete(svc) => {
                enqueue(&tx, &svc).await;
            }
            watcher::Event::Init | watcher::Event::InitApply(_) | watcher::Event::InitDone => {}
        }
    }
    Ok(())
}

/// Watches candidate Pods, admitting only meaningful transitions, and fans
/// each admitted pod out to every source Service whose cached selector
/// matches its labels.
pub async fn watch_pods(
    api: Api<Pod>,
    ctx: Arc<Context>,
    tx: Sender<ReconcileKey>,
) -> crate::util::Result<()> {
    let mut known: HashMap<String, ObservedPodState> = HashMap::new();
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    while let Some(event) = stream.try_next().await.map_err(ControllerError::from)? {
        match event {
            watcher::Event::Apply(pod) => {
                let key = pod_key(&pod);
                let after = ObservedPodState::from_pod(&pod);
                let admit = match known.get(&key) {
                    Some(before) => is_meaningful_transition(before, &after),
                    None => true,
                };
                known.insert(key, after);
                if admit {
                    fan_out_pod_event(&ctx, &tx, &pod).await;
                }
            }
            watcher::Event::Delete(pod) => {
                known.remove(&pod_key(&pod));
                fan_out_pod_event(&ctx, &tx, &pod).await;
            }
            watcher::Event::Init => known.clear(),
            watcher::Event::InitApply(pod) => {
                known.insert(pod_key(&pod), ObservedPodState::from_pod(&pod));
            }
            watcher::Event::InitDone => {}
        }
    }
    Ok(())
}

/// Watches EndpointSlices for drift, admitting only slices this controller
/// manages.
pub async fn watch_endpoint_slices(
    api: Api<EndpointSlice>,
    tx: Sender<ReconcileKey>,
) -> crate::util::Result<()> {
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    while let Some(event) = stream.try_next().await.map_err(ControllerError::from)? {
        if let watcher::Event::Apply(slice) | watcher::Event::Delete(slice) = event {
            let labels = slice.labels();
            if labels.get(LABEL_MANAGED_BY).map(String::as_str) != Some(MANAGED_BY_VALUE) {
                continue;
            }
            if let (Some(ns), Some(source)) = (slice.namespace(), labels.get(LABEL_SOURCE_SERVICE)) {
                let _ = tx.send((ns, source.clone())).await;
            }
        }
    }
    Ok(())
}

fn pod_key(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.namespace().unwrap_or_default(),
        pod.name_any()
    )
}

async fn enqueue(tx: &Sender<ReconcileKey>, svc: &Service) {
    if let Some(ns) = svc.namespace() {
        let _ = tx.send((ns, svc.name_any())).await;
    }
}

async fn fan_out_pod_event(ctx: &Arc<Context>, tx: &Sender<ReconcileKey>, pod: &Pod) {
    let Some(ns) = pod.namespace() else { return };
    let labels: BTreeMap<String, String> = pod.labels().clone().into_iter().collect();
    let mut hits = ctx.pod_index.matching_services(&ns, &labels).await;
    if hits.is_empty() {
        m::CACHE_MISS_TOTAL.with_label_values(&[&ns]).inc();
        hits = repopulate_namespace(ctx, &ns, &labels).await;
    } else {
        m::CACHE_HIT_TOTAL.with_label_values(&[&ns]).inc();
    }
    for service_name in hits {
        let _ = tx.send((ns.clone(), service_name)).await;
    }
}

/// Double-checked repopulation on a cache miss: lists every Service in
/// `namespace`, upserts the opted-in ones with a non-empty selector into the
/// reverse index, and returns those whose selector matches `labels` directly
/// — avoiding a second cache read racing a concurrent repopulation for the
/// same namespace. Bounded by the configured cache-refill timeout; a timed
/// out or failed list just leaves the cache as-is for the next event.
async fn repopulate_namespace(
    ctx: &Arc<Context>,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Vec<String> {
    let timer = m::CACHE_UPDATE_DURATION_SECONDS
        .with_label_values(&[namespace])
        .start_timer();
    let services: Box<dyn ApiTrait<Service>> = ctx.client.namespaced(namespace);
    let listed = match tokio::time::timeout(ctx.config.cache_refill_timeout, services.list()).await
    {
        Ok(Ok(list)) => list,
        Ok(Err(e)) => {
            log::warn!("pod index repopulation failed for {namespace}: {e}");
            timer.stop_and_discard();
            return Vec::new();
        }
        Err(_) => {
            m::TIMEOUTS_TOTAL.with_label_values(&["cache_refill"]).inc();
            timer.stop_and_discard();
            return Vec::new();
        }
    };
    timer.observe_duration();

    let mut hits = Vec::new();
    for svc in &listed.items {
        if !annotations::is_enabled(svc) {
            continue;
        }
        let selector: BTreeMap<String, String> = svc
            .spec
            .as_ref()
            .and_then(|s| s.selector.clone())
            .unwrap_or_default();
        if selector.is_empty() {
            continue;
        }
        let name = svc.name_any();
        ctx.pod_index
            .upsert(namespace, &name, selector.clone())
            .await;
        if selector.iter().all(|(k, v)| labels.get(k) == Some(v)) {
            hits.push(name);
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

    fn state(ready: bool, terminating: bool, has_ip: bool, phase: &str) -> ObservedPodState {
        ObservedPodState {
            ready,
            terminating,
            has_ip,
            phase: phase.to_string(),
        }
    }

    #[test]
    fn ready_flip_is_meaningful() {
        assert!(is_meaningful_transition(
            &state(false, false, true, "Running"),
            &state(true, false, true, "Running"),
        ));
    }

    #[test]
    fn unrelated_change_is_not_meaningful() {
        assert!(!is_meaningful_transition(
            &state(true, false, true, "Running"),
            &state(true, false, true, "Running"),
        ));
    }

    #[test]
    fn terminal_phase_crossing_is_meaningful() {
        assert!(is_meaningful_transition(
            &state(false, false, true, "Running"),
            &state(false, false, true, "Succeeded"),
        ));
    }

    #[test]
    fn observed_state_from_pod_reads_phase_and_ip() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                pod_ip: Some("10.0.0.1".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let observed = ObservedPodState::from_pod(&pod);
        assert!(observed.ready);
        assert!(observed.has_ip);
        assert_eq!(observed.phase, "Running");
    }
}
