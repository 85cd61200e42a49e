//! The metrics surface for this controller: a `lazy_static!` block of
//! `prometheus` collectors backed by the default registry, served by
//! `leaderslice_shared::metrics::run_metrics_and_health_server`.

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::ListParams;
use prometheus::{CounterVec, GaugeVec, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec};
use std::time::Duration;

use leaderslice_shared::system::{LABEL_MANAGED_BY, MANAGED_BY_VALUE};

use crate::util::pod_index::PodIndex;

lazy_static! {
    pub static ref RECONCILES_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "leaderslice_reconciles_total",
        "Total reconciles attempted, by namespace and service",
        &["namespace", "service"]
    )
    .unwrap();

    pub static ref RECONCILE_ERRORS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "leaderslice_reconcile_errors_total",
        "Total reconcile errors, by namespace, service and reason",
        &["namespace", "service", "reason"]
    )
    .unwrap();

    pub static ref RECONCILE_DURATION_SECONDS: HistogramVec = prometheus::register_histogram_vec!(
        "leaderslice_reconcile_duration_seconds",
        "Reconcile duration",
        &["namespace", "service"]
    )
    .unwrap();

    pub static ref READY_PODS: IntGaugeVec = prometheus::register_int_gauge_vec!(
        "leaderslice_ready_pods",
        "Ready candidate pods observed for a source Service",
        &["namespace", "service"]
    )
    .unwrap();

    pub static ref LEADER_STABLE: IntGaugeVec = prometheus::register_int_gauge_vec!(
        "leaderslice_leader_stable",
        "1 if the leader is unchanged from the previous reconcile, else 0",
        &["namespace", "service"]
    )
    .unwrap();

    pub static ref SERVICE_WITHOUT_ENDPOINTS: IntGaugeVec = prometheus::register_int_gauge_vec!(
        "leaderslice_service_without_endpoints",
        "1 if the leader Service currently has no endpoints",
        &["namespace", "service"]
    )
    .unwrap();

    pub static ref FAILOVER_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "leaderslice_failover_total",
        "Total leader failovers, by reason",
        &["namespace", "service", "reason"]
    )
    .unwrap();

    pub static ref FAILOVER_LATENCY_SECONDS: HistogramVec = prometheus::register_histogram_vec!(
        "leaderslice_failover_latency_seconds",
        "Time from failover detection to the write that resolved it",
        &["namespace", "service", "reason"]
    )
    .unwrap();

    pub static ref STICKY_HIT_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "leaderslice_sticky_hit_total",
        "Total reconciles that kept the existing sticky leader",
        &["namespace", "service"]
    )
    .unwrap();

    pub static ref STICKY_MISS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "leaderslice_sticky_miss_total",
        "Total reconciles that had to select a fresh leader",
        &["namespace", "service"]
    )
    .unwrap();

    pub static ref LEADER_SELECTION_ATTEMPTS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "leaderslice_leader_selection_attempts_total",
        "Total leader-selection passes run",
        &["namespace", "service"]
    )
    .unwrap();

    pub static ref PORT_RESOLUTION_FAILURES_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "leaderslice_port_resolution_failures_total",
        "Total named-port resolution failures, by port name",
        &["namespace", "service", "port_name"]
    )
    .unwrap();

    pub static ref ENDPOINT_WRITE_ERRORS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "leaderslice_endpoint_write_errors_total",
        "Total errors writing the leader EndpointSlice",
        &["namespace", "service"]
    )
    .unwrap();

    pub static ref LEADER_DURATION_SECONDS: HistogramVec = prometheus::register_histogram_vec!(
        "leaderslice_leader_duration_seconds",
        "Time a pod spent as leader before being replaced",
        &["namespace", "service"]
    )
    .unwrap();

    pub static ref LEADER_POD_AGE_SECONDS: GaugeVec = prometheus::register_gauge_vec!(
        "leaderslice_leader_pod_age_seconds",
        "Age of the currently selected leader pod",
        &["namespace", "service"]
    )
    .unwrap();

    pub static ref LEADER_SERVICES_TOTAL: IntGauge = prometheus::register_int_gauge!(
        "leaderslice_leader_services_total",
        "Total leader Services currently managed"
    )
    .unwrap();

    pub static ref ENDPOINT_SLICES_TOTAL: IntGauge = prometheus::register_int_gauge!(
        "leaderslice_endpoint_slices_total",
        "Total leader EndpointSlices currently managed"
    )
    .unwrap();

    pub static ref CACHE_HIT_TOTAL: CounterVec = prometheus::register_counter_vec!(
        "leaderslice_cache_hit_total",
        "Reverse-index cache hits, by namespace",
        &["namespace"]
    )
    .unwrap();

    pub static ref CACHE_MISS_TOTAL: CounterVec = prometheus::register_counter_vec!(
        "leaderslice_cache_miss_total",
        "Reverse-index cache misses, by namespace",
        &["namespace"]
    )
    .unwrap();

    pub static ref CACHE_SIZE: IntGaugeVec = prometheus::register_int_gauge_vec!(
        "leaderslice_cache_size",
        "Reverse-index entries currently cached, by namespace",
        &["namespace"]
    )
    .unwrap();

    pub static ref CACHE_UPDATE_DURATION_SECONDS: HistogramVec = prometheus::register_histogram_vec!(
        "leaderslice_cache_update_duration_seconds",
        "Time spent refilling the reverse index",
        &["namespace"]
    )
    .unwrap();

    pub static ref TIMEOUTS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "leaderslice_timeouts_total",
        "Total operation timeouts, by kind",
        &["kind"]
    )
    .unwrap();
}

/// Labels shared by the `reason` dimension of the failover metrics.
pub fn reason_label(reason: crate::util::leader_selector::FailoverReason) -> &'static str {
    match reason {
        crate::util::leader_selector::FailoverReason::Terminating => "terminating",
        crate::util::leader_selector::FailoverReason::NotReady => "notReady",
        crate::util::leader_selector::FailoverReason::NoIp => "noIP",
        crate::util::leader_selector::FailoverReason::NoneReady => "noneReady",
    }
}

/// Refreshes the cluster-wide `leader-services-total`/`endpoint-slices-total`
/// gauges and the per-namespace `cache-size` gauge. Run periodically by a
/// background task in `main`; each cluster round-trip is bounded by
/// `timeout` per the metrics-refresh deadline, and a timeout only skips that
/// round's gauge update rather than failing the task.
pub async fn refresh_cluster_gauges(client: &kube::Client, pod_index: &PodIndex, timeout: Duration) {
    let lp = ListParams::default().labels(&format!("{LABEL_MANAGED_BY}={MANAGED_BY_VALUE}"));

    let services: kube::Api<Service> = kube::Api::all(client.clone());
    match tokio::time::timeout(timeout, services.list(&lp)).await {
        Ok(Ok(list)) => LEADER_SERVICES_TOTAL.set(list.items.len() as i64),
        Ok(Err(e)) => log::warn!("leader-services-total refresh failed: {e}"),
        Err(_) => {
            TIMEOUTS_TOTAL.with_label_values(&["leader_services_total"]).inc();
        }
    }

    let slices: kube::Api<EndpointSlice> = kube::Api::all(client.clone());
    match tokio::time::timeout(timeout, slices.list(&lp)).await {
        Ok(Ok(list)) => ENDPOINT_SLICES_TOTAL.set(list.items.len() as i64),
        Ok(Err(e)) => log::warn!("endpoint-slices-total refresh failed: {e}"),
        Err(_) => {
            TIMEOUTS_TOTAL.with_label_values(&["endpoint_slices_total"]).inc();
        }
    }

    for (namespace, size) in pod_index.namespace_sizes().await {
        CACHE_SIZE.with_label_values(&[&namespace]).set(size as i64);
    }
}
