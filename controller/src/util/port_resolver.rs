//! Fail-closed port resolution: every `targetPort` in the output is a
//! concrete integer, or the whole resolution fails.

use k8s_openapi::api::core::v1::{Pod, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use leaderslice_shared::k8s::pod::find_named_container_port;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortResolutionError {
    #[error("cannot resolve named port {0}: no leader pod available")]
    NoLeaderPod(String),
    #[error("cannot resolve named port {0}: no container port with that name")]
    PortNotFound(String),
}

impl PortResolutionError {
    /// The named port that failed to resolve, for metric labeling.
    pub fn port_name(&self) -> &str {
        match self {
            PortResolutionError::NoLeaderPod(name) => name,
            PortResolutionError::PortNotFound(name) => name,
        }
    }
}

/// Resolves every port in `ports` to a concrete integer `targetPort`
/// against `leader_pod`. Numeric `targetPort`s pass through unchanged, even
/// when `leader_pod` is `None`. Returns the first error encountered rather
/// than partially resolving; callers must fail closed on `Err`.
pub fn resolve_ports(
    ports: &[ServicePort],
    leader_pod: Option<&Pod>,
) -> Result<Vec<ServicePort>, PortResolutionError> {
    ports
        .iter()
        .map(|p| resolve_one(p, leader_pod))
        .collect()
}

fn resolve_one(
    port: &ServicePort,
    leader_pod: Option<&Pod>,
) -> Result<ServicePort, PortResolutionError> {
    let resolved_target = match &port.target_port {
        None | Some(IntOrString::Int(_)) => port.target_port.clone(),
        Some(IntOrString::String(name)) => {
            let pod = leader_pod.ok_or_else(|| PortResolutionError::NoLeaderPod(name.clone()))?;
            let container_port = find_named_container_port(pod, name)
                .ok_or_else(|| PortResolutionError::PortNotFound(name.clone()))?;
            Some(IntOrString::Int(container_port))
        }
    };
    Ok(ServicePort {
        target_port: resolved_target,
        ..port.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec};

    fn numeric_port(name: &str, port: i32, target: i32) -> ServicePort {
        ServicePort {
            name: Some(name.to_string()),
            port,
            target_port: Some(IntOrString::Int(target)),
            ..Default::default()
        }
    }

    fn named_port(name: &str, port: i32, target_name: &str) -> ServicePort {
        ServicePort {
            name: Some(name.to_string()),
            port,
            target_port: Some(IntOrString::String(target_name.to_string())),
            ..Default::default()
        }
    }

    fn pod_with_container_port(name: &str, port: i32) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    ports: Some(vec![ContainerPort {
                        name: Some(name.to_string()),
                        container_port: port,
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn numeric_ports_pass_through_without_a_pod() {
        let ports = vec![numeric_port("http", 80, 8080)];
        let resolved = resolve_ports(&ports, None).unwrap();
        assert_eq!(resolved[0].target_port, Some(IntOrString::Int(8080)));
    }

    #[test]
    fn named_port_requires_leader_pod() {
        let ports = vec![named_port("http", 80, "http")];
        let err = resolve_ports(&ports, None).unwrap_err();
        assert_eq!(err, PortResolutionError::NoLeaderPod("http".to_string()));
    }

    #[test]
    fn named_port_resolves_against_pod_containers() {
        let ports = vec![named_port("http", 80, "http")];
        let pod = pod_with_container_port("http", 9090);
        let resolved = resolve_ports(&ports, Some(&pod)).unwrap();
        assert_eq!(resolved[0].target_port, Some(IntOrString::Int(9090)));
    }

    #[test]
    fn named_port_not_found_is_an_error() {
        let ports = vec![named_port("grpc", 80, "grpc")];
        let pod = pod_with_container_port("http", 9090);
        let err = resolve_ports(&ports, Some(&pod)).unwrap_err();
        assert_eq!(err, PortResolutionError::PortNotFound("grpc".to_string()));
    }

    #[test]
    fn one_failure_fails_the_whole_batch() {
        let ports = vec![numeric_port("http", 80, 8080), named_port("grpc", 90, "grpc")];
        let pod = pod_with_container_port("http", 9090);
        assert!(resolve_ports(&ports, Some(&pod)).is_err());
    }
}
