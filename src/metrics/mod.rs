//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transaction submissions and failures by kind
//! - Nonce sequencer position and resyncs
//! - Receipt wait latency

use crate::error::GatewayResult;

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::Address;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "txm_transactions_submitted_total",
        "Total transactions accepted by the node",
        &[]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "txm_transactions_failed_total",
        "Total submissions that failed, by error kind",
        &["kind"]
    ).unwrap();

    pub static ref RECEIPT_WAIT: HistogramVec = register_histogram_vec!(
        "txm_receipt_wait_seconds",
        "Time from the first receipt poll until a receipt was found",
        &[],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Nonce metrics
    pub static ref NONCE_ASSIGNED: GaugeVec = register_gauge_vec!(
        "txm_nonce_assigned",
        "Next nonce the sequencer will hand out",
        &["address"]
    ).unwrap();

    pub static ref NONCE_RESYNCS: CounterVec = register_counter_vec!(
        "txm_nonce_resyncs_total",
        "Total nonce resynchronizations against the chain",
        &["address"]
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

    pub async fn run(&self) -> GatewayResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_tx_submitted() {
    TX_SUBMITTED.with_label_values(&[]).inc();
}

pub fn record_tx_failed(kind: &str) {
    TX_FAILED.with_label_values(&[kind]).inc();
}

pub fn record_receipt_wait(latency_secs: f64) {
    RECEIPT_WAIT.with_label_values(&[]).observe(latency_secs);
}

pub fn record_nonce_assigned(address: &Address, nonce: u64) {
    NONCE_ASSIGNED
        .with_label_values(&[&format!("{:?}", address)])
        .set(nonce as f64);
}

pub fn record_nonce_resync(address: &Address) {
    NONCE_RESYNCS
        .with_label_values(&[&format!("{:?}", address)])
        .inc();
}
