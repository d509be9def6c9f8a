//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec,
    TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

lazy_static::lazy_static! {
    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "sentry_operator_reconciliations_total",
        "Total number of reconciliations",
        &["kind"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "sentry_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["kind", "class"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "sentry_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Sentry API operations by outcome
    pub static ref SENTRY_OPERATIONS: CounterVec = register_counter_vec!(
        "sentry_operator_sentry_operations_total",
        "Total number of Sentry operations by outcome",
        &["kind", "operation", "outcome"]
    ).unwrap();

    /// Total number of cleanup operations
    pub static ref CLEANUPS: CounterVec = register_counter_vec!(
        "sentry_operator_cleanups_total",
        "Total number of finalizer cleanups",
        &["kind"]
    ).unwrap();

    /// Whether this replica currently holds the leader lease (1 = leader)
    pub static ref LEADER: prometheus::Gauge = prometheus::register_gauge!(
        "sentry_operator_leader",
        "Whether this replica holds the leader lease"
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "sentry_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

static READY: AtomicBool = AtomicBool::new(false);

/// Mark the operator ready once its controllers are running
pub fn set_ready(ready: bool) {
    READY.store(ready, Ordering::SeqCst);
}

/// Serve `/metrics`, `/healthz` and `/readyz` on `addr`
pub async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Metrics server listening");
    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            let served = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service_fn(route))
                .await;
            if let Err(e) = served {
                warn!(%peer, error = %e, "Metrics connection failed");
            }
        });
    }
}

async fn route(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => encode_metrics(),
        "/healthz" => text(StatusCode::OK, "ok"),
        "/readyz" if READY.load(Ordering::SeqCst) => text(StatusCode::OK, "ok"),
        "/readyz" => text(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

fn encode_metrics() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return text(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_registered() {
        SENTRY_OPERATIONS
            .with_label_values(&["Project", "create", "success"])
            .inc();
        let names: Vec<_> = prometheus::gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"sentry_operator_sentry_operations_total".to_string()));
    }

    #[test]
    fn test_error_responses_carry_status() {
        let response = text(StatusCode::SERVICE_UNAVAILABLE, "not ready");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
