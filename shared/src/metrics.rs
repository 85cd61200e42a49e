use log::info;
use prometheus::Encoder;
use warp::{Filter, Rejection, Reply};

/// Environment variable name for setting the metrics/health port.
pub const METRICS_PORT_LABEL: &str = "METRICS_PORT";

/// Reports this system's custom Prometheus metrics along with process
/// metrics such as process_cpu_seconds_total, process_open_fds, etc, added
/// by default to the default Prometheus registry.
/// See https://prometheus.io/docs/instrumenting/writing_clientlibs/#process-metrics
async fn metrics_handler() -> Result<impl Reply, Rejection> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .expect("couldn't encode prometheus metrics");
    let res =
        String::from_utf8(buffer).expect("prometheus metrics could not be converted to String");
    Ok(res)
}

/// A liveness/readiness probe. Returns `Ok(())` when the corresponding
/// condition holds, `Err(reason)` otherwise; the reason is surfaced as the
/// response body on failure.
pub trait HealthCheck: Send + Sync + 'static {
    fn check(&self) -> Result<(), String>;
}

async fn health_handler(
    check: std::sync::Arc<dyn HealthCheck>,
) -> Result<Box<dyn Reply>, Rejection> {
    match check.check() {
        Ok(()) => Ok(Box::new(warp::reply::with_status(
            "ok",
            warp::http::StatusCode::OK,
        ))),
        Err(reason) => Ok(Box::new(warp::reply::with_status(
            reason,
            warp::http::StatusCode::SERVICE_UNAVAILABLE,
        ))),
    }
}

/// Serves Prometheus metrics at `/metrics`, liveness at `/healthz` and
/// readiness at `/readyz` over one `warp` HTTP server.
pub async fn run_metrics_and_health_server(
    port: u16,
    liveness: std::sync::Arc<dyn HealthCheck>,
    readiness: std::sync::Arc<dyn HealthCheck>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    info!(
        "starting metrics/health server on port {} at /metrics, /healthz, /readyz",
        port
    );
    let metrics_route = warp::path!("metrics").and_then(metrics_handler);
    let healthz_route = warp::path!("healthz")
        .and(warp::any().map(move || liveness.clone()))
        .and_then(health_handler);
    let readyz_route = warp::path!("readyz")
        .and(warp::any().map(move || readiness.clone()))
        .and_then(health_handler);
    let routes = metrics_route.or(healthz_route).or(readyz_route);
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
    Ok(())
}
