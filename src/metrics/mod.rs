//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Orchestrator step transitions
//! - Execution outcomes and latency
//! - Trustline recoveries
//! - Price fetch attempts

use crate::error::{ServiceError, ServiceResult};
use crate::tx::{OperationKind, Step};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Orchestrator metrics
    pub static ref STEP_TRANSITIONS: CounterVec = register_counter_vec!(
        "orchestrator_step_transitions_total",
        "Total step transitions by target step",
        &["step"]
    ).unwrap();

    pub static ref EXECUTIONS: CounterVec = register_counter_vec!(
        "orchestrator_executions_total",
        "Total finished executions by operation kind and outcome",
        &["kind", "outcome"]
    ).unwrap();

    pub static ref EXECUTION_LATENCY: HistogramVec = register_histogram_vec!(
        "orchestrator_execution_latency_seconds",
        "Execution latency including time spent waiting for a signature",
        &["kind"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    pub static ref RECOVERIES: CounterVec = register_counter_vec!(
        "orchestrator_trustline_recoveries_total",
        "Trustline recoveries by outcome",
        &["outcome"]
    ).unwrap();

    // Price fetch metrics
    pub static ref FETCH_ATTEMPTS: CounterVec = register_counter_vec!(
        "pricing_fetch_attempts_total",
        "Upstream price requests by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref FETCH_KEYS: CounterVec = register_counter_vec!(
        "pricing_fetch_keys_total",
        "Requested price keys by final outcome",
        &["outcome"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> ServiceResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ServiceError::Bind {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;
        axum::serve(listener, app)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_step(step: Step) {
    STEP_TRANSITIONS.with_label_values(&[step.as_str()]).inc();
}

pub fn record_execution(kind: OperationKind, outcome: &str, latency_secs: f64) {
    EXECUTIONS
        .with_label_values(&[kind.as_str(), outcome])
        .inc();
    EXECUTION_LATENCY
        .with_label_values(&[kind.as_str()])
        .observe(latency_secs);
}

pub fn record_recovery(outcome: &str) {
    RECOVERIES.with_label_values(&[outcome]).inc();
}

pub fn record_fetch_attempt(outcome: &str) {
    FETCH_ATTEMPTS.with_label_values(&[outcome]).inc();
}

pub fn record_fetch_key(outcome: &str) {
    FETCH_KEYS.with_label_values(&[outcome]).inc();
}
