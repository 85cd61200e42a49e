//! Pure helpers for reading candidate-pod state: selector matching,
//! readiness, named-container-port lookup and IP family detection. None of
//! these touch the API.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::BTreeMap;

/// Returns true if `pod`'s labels satisfy every key/value pair in
/// `selector`. An empty selector matches nothing (Services are never
/// allowed to select every pod in a namespace by omission).
pub fn matches_selector(pod: &Pod, selector: &BTreeMap<String, String>) -> bool {
    if selector.is_empty() {
        return false;
    }
    let labels = match &pod.metadata.labels {
        Some(l) => l,
        None => return false,
    };
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
}

/// The pod's `Ready` condition, if present.
pub fn ready_condition(pod: &Pod) -> Option<&k8s_openapi::api::core::v1::PodCondition> {
    pod.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Ready")
}

/// Whether the pod is currently Ready (condition status == "True").
pub fn is_ready(pod: &Pod) -> bool {
    ready_condition(pod).is_some_and(|c| c.status == "True")
}

/// How long the pod has been continuously Ready, if it is Ready and the
/// condition carries a last-transition time.
pub fn ready_duration(pod: &Pod, now: chrono::DateTime<chrono::Utc>) -> Option<chrono::Duration> {
    let cond = ready_condition(pod)?;
    if cond.status != "True" {
        return None;
    }
    let Time(transition) = cond.last_transition_time.as_ref()?;
    Some(now - *transition)
}

/// True if the pod is being deleted (non-null `deletionTimestamp`).
pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// The pod's assigned IP, if scheduled and networked.
pub fn pod_ip(pod: &Pod) -> Option<&str> {
    let ip = pod.status.as_ref()?.pod_ip.as_deref()?;
    if ip.is_empty() {
        None
    } else {
        Some(ip)
    }
}

/// `discovery.k8s.io/v1` `addressType` implied by an IP's family.
pub fn address_type_for_ip(ip: &str) -> &'static str {
    if ip.contains(':') {
        "IPv6"
    } else {
        "IPv4"
    }
}

/// Resolves a named container port against `pod`'s containers, scanning
/// containers in declaration order and returning the first positive
/// integer port whose name matches. Mirrors the named-port resolution used
/// by Kubernetes Services themselves.
pub fn find_named_container_port(pod: &Pod, port_name: &str) -> Option<i32> {
    let containers = pod.spec.as_ref()?.containers.as_slice();
    for container in containers {
        if let Some(ports) = &container.ports {
            for p in ports {
                if p.name.as_deref() == Some(port_name) && p.container_port > 0 {
                    return Some(p.container_port);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, ContainerPort, PodCondition, PodSpec, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn labeled_pod(labels: &[(&str, &str)]) -> Pod {
        let mut map = BTreeMap::new();
        for (k, v) in labels {
            map.insert(k.to_string(), v.to_string());
        }
        Pod {
            metadata: ObjectMeta {
                labels: Some(map),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn empty_selector_never_matches() {
        let pod = labeled_pod(&[("app", "demo")]);
        assert!(!matches_selector(&pod, &BTreeMap::new()));
    }

    #[test]
    fn selector_requires_all_pairs() {
        let pod = labeled_pod(&[("app", "demo"), ("tier", "backend")]);
        let mut sel = BTreeMap::new();
        sel.insert("app".to_string(), "demo".to_string());
        assert!(matches_selector(&pod, &sel));
        sel.insert("tier".to_string(), "frontend".to_string());
        assert!(!matches_selector(&pod, &sel));
    }

    #[test]
    fn pod_without_labels_never_matches() {
        let pod = Pod::default();
        let mut sel = BTreeMap::new();
        sel.insert("app".to_string(), "demo".to_string());
        assert!(!matches_selector(&pod, &sel));
    }

    fn pod_with_ready(status: &str, transition: Option<chrono::DateTime<chrono::Utc>>) -> Pod {
        Pod {
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: status.to_string(),
                    last_transition_time: transition.map(Time),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn is_ready_reflects_condition_status() {
        assert!(is_ready(&pod_with_ready("True", None)));
        assert!(!is_ready(&pod_with_ready("False", None)));
        assert!(!is_ready(&Pod::default()));
    }

    #[test]
    fn ready_duration_requires_ready_and_timestamp() {
        let now = chrono::Utc::now();
        let then = now - chrono::Duration::seconds(30);
        let pod = pod_with_ready("True", Some(then));
        let dur = ready_duration(&pod, now).unwrap();
        assert!(dur >= chrono::Duration::seconds(29));

        assert!(ready_duration(&pod_with_ready("False", Some(then)), now).is_none());
        assert!(ready_duration(&pod_with_ready("True", None), now).is_none());
    }

    #[test]
    fn address_type_detects_ip_family() {
        assert_eq!(address_type_for_ip("10.0.0.1"), "IPv4");
        assert_eq!(address_type_for_ip("fd00::1"), "IPv6");
    }

    fn pod_with_ports(ports: Vec<(&str, i32)>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    ports: Some(
                        ports
                            .into_iter()
                            .map(|(name, port)| ContainerPort {
                                name: Some(name.to_string()),
                                container_port: port,
                                ..Default::default()
                            })
                            .collect(),
                    ),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn named_port_found() {
        let pod = pod_with_ports(vec![("http", 8080), ("metrics", 9090)]);
        assert_eq!(find_named_container_port(&pod, "metrics"), Some(9090));
    }

    #[test]
    fn named_port_missing() {
        let pod = pod_with_ports(vec![("http", 8080)]);
        assert_eq!(find_named_container_port(&pod, "grpc"), None);
    }

    #[test]
    fn named_port_rejects_non_positive() {
        let pod = pod_with_ports(vec![("http", 0)]);
        assert_eq!(find_named_container_port(&pod, "http"), None);
    }
}
