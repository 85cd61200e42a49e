//! Publishes Kubernetes Events against the source Service, for the event
//! reasons named in this system's external interface contract. Mockable via
//! the [`EventPublisher`] trait, the same seam `leaderslice_shared::k8s::api`
//! uses for `Api<T>`, so reconcile-pipeline tests don't need a live cluster
//! event sink.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Service};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::ResourceExt;
use mockall::automock;

/// The event reasons this controller is documented to emit against a
/// source Service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    InvalidService,
    NoPodsFound,
    NoReadyPods,
    PortResolutionFailed,
    NamedPortResolutionFailed,
    EndpointSliceDeleted,
    LeaderServiceCreated,
    LeaderRoutingAvailable,
    LeaderChanged,
}

impl Reason {
    fn as_str(self) -> &'static str {
        match self {
            Reason::InvalidService => "InvalidService",
            Reason::NoPodsFound => "NoPodsFound",
            Reason::NoReadyPods => "NoReadyPods",
            Reason::PortResolutionFailed => "PortResolutionFailed",
            Reason::NamedPortResolutionFailed => "NamedPortResolutionFailed",
            Reason::EndpointSliceDeleted => "EndpointSliceDeleted",
            Reason::LeaderServiceCreated => "LeaderServiceCreated",
            Reason::LeaderRoutingAvailable => "LeaderRoutingAvailable",
            Reason::LeaderChanged => "LeaderChanged",
        }
    }

    fn event_type(self) -> EventType {
        match self {
            Reason::LeaderServiceCreated | Reason::LeaderRoutingAvailable | Reason::LeaderChanged => {
                EventType::Normal
            }
            _ => EventType::Warning,
        }
    }
}

fn object_ref(source: &Service) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Service".to_string()),
        name: source.metadata.name.clone(),
        namespace: source.metadata.namespace.clone(),
        uid: source.metadata.uid.clone(),
        resource_version: source.metadata.resource_version.clone(),
        ..Default::default()
    }
}

/// Publishes one Event of `reason` against a source Service. Publish
/// failures must be swallowed by implementations, never propagated: losing
/// an Event must not fail the reconcile that triggered it (for instance, a
/// namespace mid-termination rejects event writes).
#[automock]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, source: Service, reason: Reason, note: String);
}

/// The real [`EventPublisher`], backed by `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    client: kube::Client,
    reporter: Reporter,
}

impl KubeEventPublisher {
    pub fn new(client: kube::Client, reporter: Reporter) -> Self {
        KubeEventPublisher { client, reporter }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, source: Service, reason: Reason, note: String) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), object_ref(&source));
        let event = Event {
            type_: reason.event_type(),
            reason: reason.as_str().to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            log::warn!(
                "failed to publish {} event for {}/{}: {}",
                reason.as_str(),
                source.namespace().unwrap_or_default(),
                source.name_any(),
                e
            );
        }
    }
}
