use std::collections::HashMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::events::Reporter;
use leaderslice_shared::k8s::api::IntoApi;
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::util::events::{EventPublisher, KubeEventPublisher};
use crate::util::pod_index::PodIndex;

/// The set of resources this controller reads or writes.
pub trait ControllerKubeClient: IntoApi<Service> + IntoApi<Pod> + IntoApi<EndpointSlice> {}

impl<T: IntoApi<Service> + IntoApi<Pod> + IntoApi<EndpointSlice>> ControllerKubeClient for T {}

/// Shared state threaded through every reconcile and watch task.
pub struct Context {
    pub client: Arc<dyn ControllerKubeClient>,
    /// Event publisher, kept behind the mockable [`EventPublisher`] trait
    /// (the same seam as [`ControllerKubeClient`]) because the real
    /// `kube::runtime::events::Recorder` it wraps needs a live cluster
    /// connection and is not itself mockable the way `Api<T>` is.
    pub events: Arc<dyn EventPublisher>,
    pub pod_index: Arc<PodIndex>,
    pub config: Config,
    key_locks: RwLock<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl Context {
    pub fn new(client: Arc<dyn ControllerKubeClient>, raw_client: kube::Client, config: Config) -> Self {
        let reporter = Reporter {
            controller: leaderslice_shared::system::FIELD_MANAGER.to_string(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        Context::new_with_events(
            client,
            Arc::new(KubeEventPublisher::new(raw_client, reporter)),
            config,
        )
    }

    /// Builds a `Context` with an already-constructed event publisher,
    /// bypassing the need for a live `kube::Client` — used by reconcile
    /// pipeline tests with a [`MockEventPublisher`](super::events::MockEventPublisher).
    pub fn new_with_events(
        client: Arc<dyn ControllerKubeClient>,
        events: Arc<dyn EventPublisher>,
        config: Config,
    ) -> Self {
        Context {
            client,
            events,
            pod_index: Arc::new(PodIndex::new(config.cache_cap_per_namespace)),
            config,
            key_locks: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the per-key async mutex used to serialize reconciles for
    /// `(namespace, name)`, so unrelated keys don't contend with each other.
    pub async fn key_lock(&self, namespace: &str, name: &str) -> Arc<Mutex<()>> {
        let key = (namespace.to_string(), name.to_string());
        if let Some(lock) = self.key_locks.read().await.get(&key) {
            return lock.clone();
        }
        let mut guard = self.key_locks.write().await;
        guard
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
