//! Liveness and readiness predicates served by the ambient metrics/health
//! `warp` process through the `HealthCheck` trait it exposes.

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams};
use leaderslice_shared::metrics::HealthCheck;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Liveness: true once the controller has finished constructing its
/// client, context and metrics recorder.
pub struct LivenessCheck {
    initialized: Arc<AtomicBool>,
}

impl LivenessCheck {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (
            LivenessCheck {
                initialized: flag.clone(),
            },
            flag,
        )
    }
}

impl HealthCheck for LivenessCheck {
    fn check(&self) -> Result<(), String> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("controller not yet initialized".to_string())
        }
    }
}

/// Readiness: a bounded API round-trip, listing namespaces with `limit=1`.
pub struct ReadinessCheck {
    client: kube::Client,
    deadline: Duration,
    handle: tokio::runtime::Handle,
}

impl ReadinessCheck {
    pub fn new(client: kube::Client, deadline: Duration) -> Self {
        ReadinessCheck {
            client,
            deadline,
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl HealthCheck for ReadinessCheck {
    fn check(&self) -> Result<(), String> {
        let client = self.client.clone();
        let deadline = self.deadline;
        tokio::task::block_in_place(|| {
            self.handle.block_on(async move {
                let namespaces: Api<Namespace> = Api::all(client);
                let lp = ListParams::default().limit(1);
                tokio::time::timeout(deadline, namespaces.list(&lp))
                    .await
                    .map_err(|_| "readiness probe timed out".to_string())?
                    .map(|_| ())
                    .map_err(|e| format!("readiness probe failed: {e}"))
            })
        })
    }
}
