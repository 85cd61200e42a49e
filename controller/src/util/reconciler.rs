//! The reconcile pipeline: one pass per source-Service key, producing the
//! desired leader Service/EndpointSlice and updating the reverse index and
//! metrics surface.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::ResourceExt;

use leaderslice_shared::k8s::api::Api as ApiTrait;
use leaderslice_shared::k8s::pod::{is_ready, matches_selector, pod_ip};
use leaderslice_shared::k8s::service::{
    build_leader_endpoint_slice, build_leader_service, LeaderIdentity,
};
use leaderslice_shared::system::ANNOTATION_LEADER_LAST_SWITCH_TIME;

use crate::util::annotations;
use crate::util::artifact_writer;
use crate::util::controller_ctx::Context;
use crate::util::event_mapper::ReconcileKey;
use crate::util::events::Reason;
use crate::util::leader_selector::{self, FailoverReason, Selection, SelectionInput};
use crate::util::metrics as m;
use crate::util::port_resolver;
use crate::util::{ControllerError, Result};

/// Runs one full reconcile pass for `key`, serialized against concurrent
/// reconciles of the same key by [`Context::key_lock`].
pub async fn reconcile(ctx: Arc<Context>, key: ReconcileKey) -> Result<()> {
    let (namespace, name) = key;
    let lock = ctx.key_lock(&namespace, &name).await;
    let _guard = lock.lock().await;

    let start = Instant::now();
    let services: Box<dyn ApiTrait<Service>> = ctx.client.namespaced(&namespace);
    let pods: Box<dyn ApiTrait<Pod>> = ctx.client.namespaced(&namespace);
    let slices: Box<dyn ApiTrait<EndpointSlice>> = ctx.client.namespaced(&namespace);

    let outcome = run(&ctx, &*services, &*pods, &*slices, &namespace, &name).await;

    m::RECONCILE_DURATION_SECONDS
        .with_label_values(&[&namespace, &name])
        .observe(start.elapsed().as_secs_f64());
    m::RECONCILES_TOTAL
        .with_label_values(&[&namespace, &name])
        .inc();
    if let Err(e) = &outcome {
        m::RECONCILE_ERRORS_TOTAL
            .with_label_values(&[&namespace, &name, error_reason(e)])
            .inc();
    }
    outcome
}

fn error_reason(err: &ControllerError) -> &'static str {
    match err {
        ControllerError::KubeError(_) => "kube",
        ControllerError::WatcherError(_) => "watcher",
        ControllerError::PortResolution(_) => "port_resolution",
        ControllerError::OwnershipConflict { .. } => "ownership_conflict",
        ControllerError::Other(_) => "other",
    }
}

async fn run(
    ctx: &Context,
    services: &dyn ApiTrait<Service>,
    pods: &dyn ApiTrait<Pod>,
    slices: &dyn ApiTrait<EndpointSlice>,
    namespace: &str,
    name: &str,
) -> Result<()> {
    // Step 1: fetch source Service.
    let source = match services.get(name).await? {
        Some(s) => s,
        None => {
            cleanup(ctx, services, slices, name, None).await?;
            return Ok(());
        }
    };

    // Step 2: gate on opt-in.
    if !annotations::is_enabled(&source) {
        ctx.pod_index.remove(namespace, name).await;
        let leader_name = annotations::leader_service_name(&source);
        cleanup(ctx, services, slices, name, Some(leader_name)).await?;
        return Ok(());
    }

    let selector: BTreeMap<String, String> = source
        .spec
        .as_ref()
        .and_then(|s| s.selector.clone())
        .unwrap_or_default();
    ctx.pod_index
        .upsert(namespace, name, selector.clone())
        .await;

    // Step 3: validate selector.
    if selector.is_empty() {
        log::warn!(
            "NoSelector: service {}/{} is opted in but has no selector; skipping",
            namespace,
            name
        );
        ctx.events
            .publish(
                source.clone(),
                Reason::InvalidService,
                "service has no selector; cannot select a leader pod".to_string(),
            )
            .await;
        return Ok(());
    }

    // Step 4: enumerate candidates.
    let all_pods = pods.list().await?;
    let candidates: Vec<Pod> = all_pods
        .items
        .into_iter()
        .filter(|p| matches_selector(p, &selector))
        .collect();
    let ready_count = candidates.iter().filter(|p| is_ready(p)).count() as i64;
    m::READY_PODS
        .with_label_values(&[namespace, name])
        .set(ready_count);

    let leader_service_name = annotations::leader_service_name(&source);

    // Step 5: determine current leader.
    let existing_slice = slices.get(&leader_service_name).await?;
    let existing_service = services.get(&leader_service_name).await?;
    let previous_leader_uid = existing_slice
        .as_ref()
        .and_then(leader_selector::current_endpoint_target_uid)
        .map(|s| s.to_string());
    let previous_leader_pod = previous_leader_uid.as_deref().and_then(|uid| {
        candidates
            .iter()
            .find(|p| p.metadata.uid.as_deref() == Some(uid))
    });

    // Step 6: leader fast-path. A previously-targeted UID with no matching
    // live candidate is treated the same as "not ready": the pod is gone.
    let bypass_reason = match (&previous_leader_uid, previous_leader_pod) {
        (Some(_), None) => Some(FailoverReason::NotReady),
        (Some(_), Some(pod)) => leader_selector::fast_path_bypass_reason(Some(pod)),
        (None, _) => None,
    };
    let failover_start = bypass_reason.map(|_| Instant::now());

    // Step 7: select the leader.
    let sticky = annotations::sticky(&source);
    let min_ready_duration = annotations::min_ready_duration(&source);
    let now = Utc::now();
    let selection = leader_selector::select_leader(&SelectionInput {
        candidates: &candidates,
        selector: &selector,
        current_endpoint_slice: existing_slice.as_ref(),
        sticky,
        bypass_sticky: bypass_reason.is_some(),
        min_ready_duration,
        now,
    });
    m::LEADER_SELECTION_ATTEMPTS_TOTAL
        .with_label_values(&[namespace, name])
        .inc();
    if selection.sticky_hit {
        m::STICKY_HIT_TOTAL
            .with_label_values(&[namespace, name])
            .inc();
    } else if sticky && bypass_reason.is_none() {
        m::STICKY_MISS_TOTAL
            .with_label_values(&[namespace, name])
            .inc();
    }

    let selected_leader_pod = match &selection.selection {
        Selection::Leader(uid) => candidates
            .iter()
            .find(|p| p.metadata.uid.as_deref() == Some(uid.as_str())),
        Selection::None => {
            if candidates.is_empty() {
                log::warn!("NoPodsFound: no candidate pods for {}/{}", namespace, name);
                ctx.events
                    .publish(
                        source.clone(),
                        Reason::NoPodsFound,
                        "no pods match this service's selector".to_string(),
                    )
                    .await;
            } else {
                log::warn!("NoReadyPods: no eligible pods for {}/{}", namespace, name);
                ctx.events
                    .publish(
                        source.clone(),
                        Reason::NoReadyPods,
                        "no candidate pods are ready".to_string(),
                    )
                    .await;
            }
            None
        }
    };

    // Step 8: detect change.
    let new_leader_uid = selected_leader_pod.and_then(|p| p.metadata.uid.clone());
    let changed = previous_leader_uid != new_leader_uid;
    m::LEADER_STABLE
        .with_label_values(&[namespace, name])
        .set(if changed { 0 } else { 1 });

    let leader_identity = selected_leader_pod.map(to_leader_identity);
    if let Some(pod) = selected_leader_pod {
        if let Some(created) = pod.metadata.creation_timestamp.as_ref() {
            let age = (now - created.0).num_seconds().max(0) as f64;
            m::LEADER_POD_AGE_SECONDS
                .with_label_values(&[namespace, name])
                .set(age);
        }
    }

    // Step 9: resolve ports. On failure, fail closed: no endpoint-slice
    // leader, empty ports, but the leader Service is still written so the
    // broken state is observable.
    let source_ports = source
        .spec
        .as_ref()
        .and_then(|s| s.ports.clone())
        .unwrap_or_default();
    let (resolved_ports, endpoint_leader, fail_closed) =
        match port_resolver::resolve_ports(&source_ports, selected_leader_pod) {
            Ok(ports) => (ports, leader_identity.clone(), false),
            Err(e) => {
                m::PORT_RESOLUTION_FAILURES_TOTAL
                    .with_label_values(&[namespace, name, e.port_name()])
                    .inc();
                let reason = match &e {
                    port_resolver::PortResolutionError::PortNotFound(_) => {
                        Reason::NamedPortResolutionFailed
                    }
                    port_resolver::PortResolutionError::NoLeaderPod(_) => {
                        Reason::PortResolutionFailed
                    }
                };
                log::warn!("{:?}: {}/{}: {}", reason, namespace, name, e);
                ctx.events
                    .publish(source.clone(), reason, e.to_string())
                    .await;
                (Vec::new(), None, true)
            }
        };

    let previous_switch_time = previous_switch_time(existing_service.as_ref());
    let switch_time = if changed {
        Some(now)
    } else {
        previous_switch_time.or(Some(now))
    };

    // Step 10: on fail-closed, delete any existing EndpointSlice *before*
    // writing the leader Service, so observers never see stale endpoints
    // alongside a broken port configuration (ordering guarantee #3).
    // Otherwise write the leader Service first, then the EndpointSlice.
    if fail_closed {
        if let Err(e) = artifact_writer::delete_leader_endpoint_slice(
            slices,
            &leader_service_name,
            ctx.config.retry_policy(),
        )
        .await
        {
            m::ENDPOINT_WRITE_ERRORS_TOTAL
                .with_label_values(&[namespace, name])
                .inc();
            return Err(e);
        }
    }

    let desired_service = build_leader_service(
        &source,
        &leader_service_name,
        &resolved_ports,
        leader_identity.as_ref(),
        switch_time,
    );
    let written_service =
        artifact_writer::apply_leader_service(services, desired_service, ctx.config.retry_policy())
            .await?;

    if fail_closed {
        if existing_slice.is_some() {
            ctx.events
                .publish(
                    source.clone(),
                    Reason::EndpointSliceDeleted,
                    "removed leader endpoint slice after a port resolution failure".to_string(),
                )
                .await;
        }
    } else {
        let desired_slice = build_leader_endpoint_slice(
            &written_service,
            endpoint_leader.as_ref(),
            new_leader_uid.as_deref(),
            &resolved_ports,
        );
        if let Err(e) = artifact_writer::apply_leader_endpoint_slice(
            slices,
            desired_slice,
            ctx.config.retry_policy(),
        )
        .await
        {
            m::ENDPOINT_WRITE_ERRORS_TOTAL
                .with_label_values(&[namespace, name])
                .inc();
            return Err(e);
        }

        if existing_service.is_none() {
            ctx.events
                .publish(
                    source.clone(),
                    Reason::LeaderServiceCreated,
                    format!("created leader service {}", leader_service_name),
                )
                .await;
        }
        if previous_leader_uid.is_none() && endpoint_leader.is_some() {
            ctx.events
                .publish(
                    source.clone(),
                    Reason::LeaderRoutingAvailable,
                    "leader endpoint slice now has a routable endpoint".to_string(),
                )
                .await;
        }
    }

    // Step 11: record metrics.
    m::SERVICE_WITHOUT_ENDPOINTS
        .with_label_values(&[namespace, name])
        .set(if endpoint_leader.is_none() { 1 } else { 0 });

    if changed {
        let reason = bypass_reason.unwrap_or(FailoverReason::NoneReady);
        m::FAILOVER_TOTAL
            .with_label_values(&[namespace, name, m::reason_label(reason)])
            .inc();
        if let Some(started) = failover_start {
            m::FAILOVER_LATENCY_SECONDS
                .with_label_values(&[namespace, name, m::reason_label(reason)])
                .observe(started.elapsed().as_secs_f64());
        }
        if let Some(prev_switch) = previous_switch_time {
            let held_for = (now - prev_switch).num_milliseconds().max(0) as f64 / 1000.0;
            m::LEADER_DURATION_SECONDS
                .with_label_values(&[namespace, name])
                .observe(held_for);
        }
        log::info!(
            "LeaderChanged: {}/{}: {:?} -> {:?}",
            namespace,
            name,
            previous_leader_uid,
            new_leader_uid
        );
        ctx.events
            .publish(
                source.clone(),
                Reason::LeaderChanged,
                format!(
                    "leader changed from {} to {}",
                    previous_leader_uid.as_deref().unwrap_or("<none>"),
                    new_leader_uid.as_deref().unwrap_or("<none>")
                ),
            )
            .await;
    }

    Ok(())
}

fn to_leader_identity(pod: &Pod) -> LeaderIdentity {
    LeaderIdentity {
        pod_name: pod.name_any(),
        pod_uid: pod.metadata.uid.clone().unwrap_or_default(),
        pod_ip: pod_ip(pod).unwrap_or_default().to_string(),
        node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        ready: is_ready(pod),
    }
}

fn previous_switch_time(existing: Option<&Service>) -> Option<DateTime<Utc>> {
    existing?
        .metadata
        .annotations
        .as_ref()?
        .get(ANNOTATION_LEADER_LAST_SWITCH_TIME)?
        .parse::<DateTime<Utc>>()
        .ok()
}

/// Tears down the leader Service (and, by owner-reference cascade, its
/// EndpointSlice) when the source Service is absent or opted out.
///
/// `known_leader_name` is `Some` when the source Service could still be
/// read (opt-in just flipped off): the exact name is known from its
/// annotations. It is `None` when the source Service itself 404ed, in which
/// case the name can't be derived and a best-effort label sweep reaps
/// whatever this controller previously wrote for `source_name`.
async fn cleanup(
    ctx: &Context,
    services: &dyn ApiTrait<Service>,
    slices: &dyn ApiTrait<EndpointSlice>,
    source_name: &str,
    known_leader_name: Option<String>,
) -> Result<()> {
    let policy = ctx.config.retry_policy();
    match known_leader_name {
        Some(leader_name) => {
            artifact_writer::delete_leader_service(services, &leader_name, policy).await?;
            artifact_writer::delete_leader_endpoint_slice(slices, &leader_name, policy).await?;
        }
        None => {
            let selector = artifact_writer::orphan_label_selector(source_name);
            let orphaned = services.list_labeled(&selector).await?;
            for svc in orphaned.items {
                let svc_name = svc.name_any();
                artifact_writer::delete_leader_service(services, &svc_name, policy).await?;
                artifact_writer::delete_leader_endpoint_slice(slices, &svc_name, policy).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reason_maps_every_variant() {
        assert_eq!(
            error_reason(&ControllerError::OwnershipConflict {
                kind: "Service",
                name: "x".to_string()
            }),
            "ownership_conflict"
        );
    }

    #[test]
    fn previous_switch_time_parses_rfc3339_annotation() {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
        let now = Utc::now();
        let svc = Service {
            metadata: ObjectMeta {
                annotations: Some(BTreeMap::from([(
                    ANNOTATION_LEADER_LAST_SWITCH_TIME.to_string(),
                    now.to_rfc3339(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        let parsed = previous_switch_time(Some(&svc)).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    #[test]
    fn previous_switch_time_absent_is_none() {
        assert!(previous_switch_time(None).is_none());
    }

    // --- Integration-style tests over `run()`, against mocked Api<T> and a
    // mocked EventPublisher. No live cluster involved. ---

    use crate::config::Config;
    use crate::util::events::{EventPublisher, MockEventPublisher};
    use k8s_openapi::api::core::v1::{
        Container, ContainerPort, PodCondition, PodSpec, PodStatus, ServicePort, ServiceSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use leaderslice_shared::k8s::api::{IntoApi, MockApi};
    use leaderslice_shared::system::ANNOTATION_ENABLED;
    use std::sync::Mutex as StdMutex;

    const NS: &str = "default";
    const SRC: &str = "my-app";
    const LEADER: &str = "my-app-leader";

    /// Never actually called: `run()` takes its `Api<T>` handles as explicit
    /// arguments, so `Context::client` only needs to type-check here.
    struct UnreachableClient;
    impl IntoApi<Service> for UnreachableClient {
        fn all(&self) -> Box<dyn ApiTrait<Service>> {
            unreachable!("reconciler tests call run() directly, not through ctx.client")
        }
        fn namespaced(&self, _: &str) -> Box<dyn ApiTrait<Service>> {
            unreachable!()
        }
        fn default_namespaced(&self) -> Box<dyn ApiTrait<Service>> {
            unreachable!()
        }
    }
    impl IntoApi<Pod> for UnreachableClient {
        fn all(&self) -> Box<dyn ApiTrait<Pod>> {
            unreachable!()
        }
        fn namespaced(&self, _: &str) -> Box<dyn ApiTrait<Pod>> {
            unreachable!()
        }
        fn default_namespaced(&self) -> Box<dyn ApiTrait<Pod>> {
            unreachable!()
        }
    }
    impl IntoApi<EndpointSlice> for UnreachableClient {
        fn all(&self) -> Box<dyn ApiTrait<EndpointSlice>> {
            unreachable!()
        }
        fn namespaced(&self, _: &str) -> Box<dyn ApiTrait<EndpointSlice>> {
            unreachable!()
        }
        fn default_namespaced(&self) -> Box<dyn ApiTrait<EndpointSlice>> {
            unreachable!()
        }
    }

    fn test_context(events: Arc<dyn EventPublisher>) -> Context {
        Context::new_with_events(Arc::new(UnreachableClient), events, Config::default())
    }

    /// Records every publish call so tests can assert on the reasons raised,
    /// without caring about the exact notes.
    fn recording_events() -> (Arc<dyn EventPublisher>, Arc<StdMutex<Vec<Reason>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let recorded = seen.clone();
        let mut mock = MockEventPublisher::new();
        mock.expect_publish()
            .returning(move |_source, reason, _note| {
                recorded.lock().unwrap().push(reason);
            });
        (Arc::new(mock), seen)
    }

    fn source_service(ports: Vec<ServicePort>, extra_annotations: &[(&str, &str)]) -> Service {
        let mut annotations = BTreeMap::from([(ANNOTATION_ENABLED.to_string(), "true".to_string())]);
        for (k, v) in extra_annotations {
            annotations.insert(k.to_string(), v.to_string());
        }
        Service {
            metadata: ObjectMeta {
                name: Some(SRC.to_string()),
                namespace: Some(NS.to_string()),
                uid: Some("src-uid".to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from([("app".to_string(), "demo".to_string())])),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(
        name: &str,
        uid: &str,
        ready: bool,
        created_secs_ago: i64,
        ip: Option<&str>,
        container_ports: Vec<(&str, i32)>,
    ) -> Pod {
        let now = Utc::now();
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                uid: Some(uid.to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "demo".to_string())])),
                creation_timestamp: Some(Time(now - chrono::Duration::seconds(created_secs_ago))),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    ports: Some(
                        container_ports
                            .into_iter()
                            .map(|(n, p)| ContainerPort {
                                name: Some(n.to_string()),
                                container_port: p,
                                ..Default::default()
                            })
                            .collect(),
                    ),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                pod_ip: ip.map(|s| s.to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    last_transition_time: Some(Time(now - chrono::Duration::seconds(created_secs_ago))),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn slice_targeting(uid: &str) -> EndpointSlice {
        use k8s_openapi::api::core::v1::ObjectReference;
        use k8s_openapi::api::discovery::v1::Endpoint;
        EndpointSlice {
            metadata: ObjectMeta {
                name: Some(LEADER.to_string()),
                namespace: Some(NS.to_string()),
                ..Default::default()
            },
            endpoints: vec![Endpoint {
                target_ref: Some(ObjectReference {
                    uid: Some(uid.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// A `services` mock serving both the source-Service lookup and the
    /// leader-Service lookups, by name, and echoing back whatever is applied.
    fn services_mock(source: Service, existing_leader: Option<Service>) -> MockApi<Service> {
        let mut mock = MockApi::new();
        mock.expect_get().returning(move |name| {
            if name == SRC {
                Ok(Some(source.clone()))
            } else if name == LEADER {
                Ok(existing_leader.clone())
            } else {
                Ok(None)
            }
        });
        mock.expect_apply().returning(|obj, _| Ok(obj));
        mock.expect_delete()
            .returning(|_| Ok(either::Either::Right(Default::default())));
        mock
    }

    fn pods_mock(candidates: Vec<Pod>) -> MockApi<Pod> {
        let mut mock = MockApi::new();
        mock.expect_list().returning(move || {
            Ok(kube::core::ObjectList {
                metadata: Default::default(),
                items: candidates.clone(),
            })
        });
        mock
    }

    fn slices_mock(existing: Option<EndpointSlice>) -> MockApi<EndpointSlice> {
        let mut mock = MockApi::new();
        mock.expect_get()
            .returning(move |_| Ok(existing.clone()));
        mock.expect_apply().returning(|obj, _| Ok(obj));
        mock.expect_delete()
            .returning(|_| Ok(either::Either::Right(Default::default())));
        mock
    }

    #[tokio::test]
    async fn happy_path_selects_oldest_ready_pod() {
        let ports = vec![ServicePort {
            name: Some("http".to_string()),
            port: 80,
            target_port: Some(IntOrString::Int(8080)),
            ..Default::default()
        }];
        let source = source_service(ports, &[]);
        let pods = vec![
            pod("demo-1", "uid-1", true, 10, Some("10.0.0.1"), vec![]),
            pod("demo-0", "uid-0", true, 100, Some("10.0.0.0"), vec![]),
        ];
        let services = services_mock(source, None);
        let pods_api = pods_mock(pods);
        let slices = slices_mock(None);
        let (events, seen) = recording_events();
        let ctx = test_context(events);

        run(&ctx, &services, &pods_api, &slices, NS, SRC).await.unwrap();

        let reasons = seen.lock().unwrap();
        assert!(reasons.contains(&Reason::LeaderServiceCreated));
        assert!(reasons.contains(&Reason::LeaderRoutingAvailable));
    }

    #[tokio::test]
    async fn named_port_resolves_against_leader_pod_container_port() {
        let ports = vec![ServicePort {
            name: Some("http".to_string()),
            port: 80,
            target_port: Some(IntOrString::String("http".to_string())),
            ..Default::default()
        }];
        let source = source_service(ports, &[]);
        let pods = vec![pod(
            "demo-0",
            "uid-0",
            true,
            10,
            Some("10.0.0.0"),
            vec![("http", 9090)],
        )];
        let services = services_mock(source, None);
        let pods_api = pods_mock(pods);
        let slices = slices_mock(None);
        let (events, _seen) = recording_events();
        let ctx = test_context(events);

        run(&ctx, &services, &pods_api, &slices, NS, SRC).await.unwrap();
    }

    #[tokio::test]
    async fn failover_selects_fresh_leader_when_previous_is_not_ready() {
        let ports = vec![ServicePort {
            name: Some("http".to_string()),
            port: 80,
            target_port: Some(IntOrString::Int(8080)),
            ..Default::default()
        }];
        let source = source_service(ports, &[]);
        let pods = vec![
            pod("demo-0", "uid-0", false, 100, None, vec![]),
            pod("demo-1", "uid-1", true, 10, Some("10.0.0.1"), vec![]),
        ];
        let services = services_mock(source, None);
        let pods_api = pods_mock(pods);
        let slices = slices_mock(Some(slice_targeting("uid-0")));
        let (events, seen) = recording_events();
        let ctx = test_context(events);

        run(&ctx, &services, &pods_api, &slices, NS, SRC).await.unwrap();

        assert!(seen.lock().unwrap().contains(&Reason::LeaderChanged));
    }

    #[tokio::test]
    async fn fail_closed_on_unresolvable_named_port() {
        let ports = vec![ServicePort {
            name: Some("grpc".to_string()),
            port: 90,
            target_port: Some(IntOrString::String("grpc".to_string())),
            ..Default::default()
        }];
        let source = source_service(ports, &[]);
        let pods = vec![pod(
            "demo-0",
            "uid-0",
            true,
            10,
            Some("10.0.0.0"),
            vec![("http", 8080)],
        )];
        let services = services_mock(source, None);
        let pods_api = pods_mock(pods);
        let slices = slices_mock(Some(slice_targeting("uid-0")));
        let (events, seen) = recording_events();
        let ctx = test_context(events);

        run(&ctx, &services, &pods_api, &slices, NS, SRC).await.unwrap();

        assert!(seen.lock().unwrap().contains(&Reason::NamedPortResolutionFailed));
        assert!(seen.lock().unwrap().contains(&Reason::EndpointSliceDeleted));
    }

    #[tokio::test]
    async fn opt_out_deletes_leader_artifacts() {
        let source = source_service(vec![], &[(ANNOTATION_ENABLED, "false")]);
        let services = services_mock(source, None);
        let pods_api = pods_mock(vec![]);
        let slices = slices_mock(None);
        let (events, _seen) = recording_events();
        let ctx = test_context(events);

        run(&ctx, &services, &pods_api, &slices, NS, SRC).await.unwrap();
    }

    #[tokio::test]
    async fn restarted_pod_with_new_uid_triggers_fresh_selection_not_stickiness() {
        let ports = vec![ServicePort {
            name: Some("http".to_string()),
            port: 80,
            target_port: Some(IntOrString::Int(8080)),
            ..Default::default()
        }];
        let source = source_service(ports, &[]);
        // Same pod name, new UID after a restart: the old UID the slice
        // targets no longer matches any live candidate.
        let pods = vec![pod("demo-0", "uid-new", true, 5, Some("10.0.0.9"), vec![])];
        let services = services_mock(source, None);
        let pods_api = pods_mock(pods);
        let slices = slices_mock(Some(slice_targeting("uid-old")));
        let (events, seen) = recording_events();
        let ctx = test_context(events);

        run(&ctx, &services, &pods_api, &slices, NS, SRC).await.unwrap();

        assert!(seen.lock().unwrap().contains(&Reason::LeaderChanged));
    }
}
