//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Pending validators in the registry
//! - Deposit outcomes
//! - Order proposals, retry signals and validations
//! - Health checks

use crate::error::{KeeperError, KeeperResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, CounterVec, Encoder, Gauge,
    IntCounter, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Registry metrics
    pub static ref PENDING_VALIDATORS: Gauge = register_gauge!(
        "keeper_pending_validators",
        "Validators waiting in the registry"
    ).unwrap();

    pub static ref DEPOSITS: CounterVec = register_counter_vec!(
        "keeper_deposits_total",
        "Validator deposits by outcome",
        &["outcome"]
    ).unwrap();

    // Order metrics
    pub static ref PROPOSALS: IntCounter = register_int_counter!(
        "keeper_order_proposals_total",
        "Total conversion orders proposed"
    ).unwrap();

    pub static ref RETRY_SIGNALS: CounterVec = register_counter_vec!(
        "keeper_retry_signals_total",
        "Proposal attempts deferred to a later epoch, by reason",
        &["reason"]
    ).unwrap();

    pub static ref VALIDATIONS: CounterVec = register_counter_vec!(
        "keeper_order_validations_total",
        "Order validations by outcome",
        &["outcome"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECKS: CounterVec = register_counter_vec!(
        "keeper_health_checks_total",
        "Health checks by component and result",
        &["component", "result"]
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

    pub async fn run(&self) -> KeeperResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| KeeperError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| KeeperError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn set_pending_validators(count: usize) {
    PENDING_VALIDATORS.set(count as f64);
}

pub fn record_deposit(outcome: &str) {
    DEPOSITS.with_label_values(&[outcome]).inc();
}

pub fn record_proposal() {
    PROPOSALS.inc();
}

pub fn record_retry(reason: &str) {
    RETRY_SIGNALS.with_label_values(&[reason]).inc();
}

pub fn record_validation(accepted: bool) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    VALIDATIONS.with_label_values(&[outcome]).inc();
}

pub fn record_health_check(component: &str, healthy: bool) {
    let result = if healthy { "success" } else { "failure" };
    HEALTH_CHECKS.with_label_values(&[component, result]).inc();
}
