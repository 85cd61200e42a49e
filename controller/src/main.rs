#[macro_use]
extern crate lazy_static;
mod config;
mod util;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::Api;
use tokio::sync::mpsc;

use leaderslice_shared::k8s::KubeImpl;
use leaderslice_shared::metrics::{run_metrics_and_health_server, HealthCheck};
use leaderslice_shared::os::env_var::ActualEnvVarQuery;
use leaderslice_shared::system::API_NAMESPACE;

use config::Config;
use util::controller_ctx::Context;
use util::health::{LivenessCheck, ReadinessCheck};
use util::{event_mapper, metrics, reconciler};

/// Interval between periodic refreshes of the cluster-wide gauges
/// (`leader-services-total`, `endpoint-slices-total`, per-namespace
/// `cache-size`). These are not event-driven, so they're recomputed on a
/// fixed cadence rather than on every reconcile.
const GAUGE_REFRESH_INTERVAL_SECS: u64 = 30;

/// This is the entry point for the controller.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    env_logger::try_init()?;
    log::info!("{} controller starting", API_NAMESPACE);

    let config = Config::from_env(&ActualEnvVarQuery);
    let kube = KubeImpl::new().await?;
    let client = kube.client();

    let ctx = Arc::new(Context::new(Arc::new(kube), client.clone(), config.clone()));

    let (liveness, initialized) = LivenessCheck::new();
    let readiness = ReadinessCheck::new(client.clone(), config.readiness_timeout);

    let mut tasks = Vec::new();

    // Serve /metrics, /healthz and /readyz over one small warp process.
    let liveness: Arc<dyn HealthCheck> = Arc::new(liveness);
    let readiness: Arc<dyn HealthCheck> = Arc::new(readiness);
    let metrics_port = config.metrics_port;
    tasks.push(tokio::spawn(async move {
        run_metrics_and_health_server(metrics_port, liveness, readiness)
            .await
            .unwrap();
    }));

    // Reconcile worker pool: bounded channel, `max_concurrent_reconciles`
    // workers draining it, so reconciles for distinct keys run truly
    // concurrently up to the ceiling while the channel itself provides
    // the ordering the work queue is responsible for.
    let (tx, rx) = mpsc::channel(1024);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    for _ in 0..config.max_concurrent_reconciles {
        let ctx = ctx.clone();
        let rx = rx.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                let key = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };
                match key {
                    Some(key) => {
                        if let Err(e) = reconciler::reconcile(ctx.clone(), key.clone()).await {
                            log::warn!("reconcile {}/{} failed: {}", key.0, key.1, e);
                        }
                    }
                    None => break,
                }
            }
        }));
    }

    // Watch Services, Pods and EndpointSlices, mapping events to reconcile
    // keys fed into the shared channel above.
    let services: Api<Service> = Api::all(client.clone());
    let tx_services = tx.clone();
    tasks.push(tokio::spawn(async move {
        event_mapper::watch_services(services, tx_services)
            .await
            .unwrap();
    }));

    let pods: Api<Pod> = Api::all(client.clone());
    let tx_pods = tx.clone();
    let pod_ctx = ctx.clone();
    tasks.push(tokio::spawn(async move {
        event_mapper::watch_pods(pods, pod_ctx, tx_pods).await.unwrap();
    }));

    let slices: Api<EndpointSlice> = Api::all(client.clone());
    let tx_slices = tx.clone();
    tasks.push(tokio::spawn(async move {
        event_mapper::watch_endpoint_slices(slices, tx_slices)
            .await
            .unwrap();
    }));
    drop(tx);

    // Periodically refresh the gauges that reflect cluster-wide totals
    // rather than a single reconcile's outcome.
    let gauge_client = client.clone();
    let gauge_ctx = ctx.clone();
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            GAUGE_REFRESH_INTERVAL_SECS,
        ));
        loop {
            interval.tick().await;
            metrics::refresh_cluster_gauges(
                &gauge_client,
                &gauge_ctx.pod_index,
                gauge_ctx.config.metrics_refresh_timeout,
            )
            .await;
        }
    }));

    initialized.store(true, Ordering::SeqCst);
    log::info!("{} controller initialized", API_NAMESPACE);

    tokio::select! {
        result = futures::future::try_join_all(tasks) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("{} controller received shutdown signal", API_NAMESPACE);
        }
    }

    log::info!("{} controller end", API_NAMESPACE);
    Ok(())
}
