//! # Metrics Collection
//!
//! Prometheus metrics for backend calls, migration passes and token rotation.

use crate::config::ObservabilityConfig;
use crate::errors::{Result, SecretplaneError};
use ::tracing::{info, warn};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metrics recorder that tracks secret control plane metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Register metric descriptions with the installed exporter
    pub fn register_descriptions(&self) {
        describe_counter!(
            "secret_backend_calls_total",
            "Provider calls made against secret backends, by operation and result"
        );
        describe_histogram!(
            "secret_backend_call_duration_seconds",
            Unit::Seconds,
            "Latency of provider calls against secret backends"
        );
        describe_counter!(
            "secret_migrations_total",
            "Revisions moved between secret backends, by result"
        );
        describe_counter!(
            "secret_migration_tasks_scheduled_total",
            "Owner migration tasks scheduled by the coordinator"
        );
        describe_counter!(
            "secret_backend_token_rotations_total",
            "Backend token rotations, by result"
        );
    }

    /// Record a provider call outcome and latency
    pub fn record_backend_call(&self, operation: &str, success: bool, duration: f64) {
        let result = if success { "success" } else { "error" };
        let labels = [("operation", operation.to_string()), ("result", result.to_string())];
        counter!("secret_backend_calls_total", &labels).increment(1);

        let duration_labels = [("operation", operation.to_string())];
        histogram!("secret_backend_call_duration_seconds", &duration_labels).record(duration);
    }

    /// Record one revision migration outcome
    pub fn record_revision_migration(&self, success: bool) {
        let result = if success { "success" } else { "error" };
        counter!("secret_migrations_total", &[("result", result.to_string())]).increment(1);
    }

    /// Record tasks scheduled by a coordinator pass
    pub fn record_tasks_scheduled(&self, count: usize) {
        counter!("secret_migration_tasks_scheduled_total").increment(count as u64);
    }

    /// Record a token rotation outcome
    pub fn record_token_rotation(&self, success: bool) {
        let result = if success { "success" } else { "error" };
        counter!("secret_backend_token_rotations_total", &[("result", result.to_string())])
            .increment(1);
    }
}

/// Install the Prometheus exporter when metrics are enabled.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        SecretplaneError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            SecretplaneError::config(format!("Failed to initialize metrics exporter: {}", e))
        })?;

    MetricsRecorder::new().register_descriptions();

    info!(metrics_addr = %metrics_addr, service_name = %config.service_name, "Metrics exporter started");
    Ok(())
}
