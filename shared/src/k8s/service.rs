//! Builders for the two objects this system owns: the selector-less leader
//! Service and its companion EndpointSlice, built for server-side apply.

use crate::system::{
    ANNOTATION_LEADER_LAST_SWITCH_TIME, ANNOTATION_LEADER_POD_NAME, ANNOTATION_LEADER_POD_UID,
    GITOPS_ANNOTATION_PREFIXES_TO_STRIP, GITOPS_LABEL_PREFIXES_TO_STRIP,
    KUBERNETES_SERVICE_NAME_LABEL, LABEL_MANAGED_BY, LABEL_SOURCE_SERVICE, MANAGED_BY_VALUE,
};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::Metadata;
use std::collections::BTreeMap;

/// Identity of the currently selected leader pod, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderIdentity {
    pub pod_name: String,
    pub pod_uid: String,
    pub pod_ip: String,
    pub node_name: Option<String>,
    pub ready: bool,
}

fn retained(key: &str, strip_prefixes: &[&str]) -> bool {
    !strip_prefixes.iter().any(|p| key.starts_with(p))
}

fn filtered_map(
    source: &Option<BTreeMap<String, String>>,
    strip_prefixes: &[&str],
) -> BTreeMap<String, String> {
    source
        .as_ref()
        .map(|m| {
            m.iter()
                .filter(|(k, _)| retained(k, strip_prefixes))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn owner_reference<M: Metadata<Ty = ObjectMeta>>(owner: &M, kind: &str) -> OwnerReference {
    let meta = owner.metadata();
    OwnerReference {
        api_version: "v1".to_string(),
        kind: kind.to_string(),
        name: meta.name.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Builds the desired leader Service. `switch_time` carries the
/// previously recorded `leader-last-switch-time` annotation forward when the
/// leader identity is unchanged; it is only updated by the caller when the
/// leader's UID actually changes (reconciler step 10's contract).
pub fn build_leader_service(
    source: &Service,
    leader_service_name: &str,
    resolved_ports: &[ServicePort],
    leader: Option<&LeaderIdentity>,
    switch_time: Option<chrono::DateTime<chrono::Utc>>,
) -> Service {
    let source_meta = &source.metadata;
    let mut labels = filtered_map(&source_meta.labels, GITOPS_LABEL_PREFIXES_TO_STRIP);
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(
        LABEL_SOURCE_SERVICE.to_string(),
        source_meta.name.clone().unwrap_or_default(),
    );

    let mut annotations =
        filtered_map(&source_meta.annotations, GITOPS_ANNOTATION_PREFIXES_TO_STRIP);
    match leader {
        Some(l) => {
            annotations.insert(ANNOTATION_LEADER_POD_NAME.to_string(), l.pod_name.clone());
            annotations.insert(ANNOTATION_LEADER_POD_UID.to_string(), l.pod_uid.clone());
        }
        None => {
            annotations.remove(ANNOTATION_LEADER_POD_NAME);
            annotations.remove(ANNOTATION_LEADER_POD_UID);
        }
    }
    if let Some(t) = switch_time {
        annotations.insert(
            ANNOTATION_LEADER_LAST_SWITCH_TIME.to_string(),
            t.to_rfc3339(),
        );
    }

    let is_headless = source
        .spec
        .as_ref()
        .and_then(|s| s.cluster_ip.as_deref())
        .map(|ip| ip == "None")
        .unwrap_or(false);
    let service_type = if is_headless {
        Some("ClusterIP".to_string())
    } else {
        source.spec.as_ref().and_then(|s| s.type_.clone())
    };

    Service {
        metadata: ObjectMeta {
            name: Some(leader_service_name.to_string()),
            namespace: source_meta.namespace.clone(),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: Some(vec![owner_reference(source, "Service")]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: None,
            ports: Some(resolved_ports.to_vec()),
            type_: service_type,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds the desired EndpointSlice for `leader_service`, with zero or one
/// endpoints depending on whether a leader pod was selected. `ports` must
/// already be fully resolved to integer target ports (the port resolver's
/// job); a named `target_port` reaching this function is a programming
/// error and panics rather than silently emitting a wrong route.
pub fn build_leader_endpoint_slice(
    leader_service: &Service,
    leader: Option<&LeaderIdentity>,
    leader_pod_uid: Option<&str>,
    ports: &[ServicePort],
) -> EndpointSlice {
    let service_name = leader_service.metadata.name.clone().unwrap_or_default();

    let endpoint_ports: Vec<EndpointPort> = ports
        .iter()
        .map(|p| EndpointPort {
            name: Some(p.name.clone().unwrap_or_default()),
            port: Some(
                p.target_port
                    .as_ref()
                    .and_then(|tp| match tp {
                        k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(i) => {
                            Some(*i)
                        }
                        k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::String(_) => {
                            None
                        }
                    })
                    .unwrap_or_else(|| {
                        panic!("build_leader_endpoint_slice received an unresolved named targetPort")
                    }),
            ),
            protocol: p.protocol.clone(),
            ..Default::default()
        })
        .collect();

    let (endpoints, address_type) = match leader {
        Some(l) => {
            let endpoint = Endpoint {
                addresses: vec![l.pod_ip.clone()],
                conditions: Some(EndpointConditions {
                    ready: Some(l.ready),
                    ..Default::default()
                }),
                node_name: l.node_name.clone(),
                target_ref: Some(k8s_openapi::api::core::v1::ObjectReference {
                    kind: Some("Pod".to_string()),
                    name: Some(l.pod_name.clone()),
                    namespace: leader_service.metadata.namespace.clone(),
                    uid: leader_pod_uid.map(|u| u.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let address_type = crate::k8s::pod::address_type_for_ip(&l.pod_ip).to_string();
            (vec![endpoint], address_type)
        }
        None => (Vec::new(), "IPv4".to_string()),
    };

    let mut labels = BTreeMap::new();
    labels.insert(
        KUBERNETES_SERVICE_NAME_LABEL.to_string(),
        service_name.clone(),
    );
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());

    EndpointSlice {
        metadata: ObjectMeta {
            name: Some(service_name),
            namespace: leader_service.metadata.namespace.clone(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(leader_service, "Service")]),
            ..Default::default()
        },
        address_type,
        endpoints,
        ports: Some(endpoint_ports),
    }
}
