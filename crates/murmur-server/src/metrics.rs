//! Metrics export for the Murmur server.
//!
//! The hub and agents record through the `metrics` facade under the names in
//! [`murmur_core::metrics::names`]. This module describes those metrics and
//! installs the Prometheus exporter.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use murmur_core::metrics::names;
use std::net::SocketAddr;
use tracing::info;

/// Describe every metric the server and core record.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of upgraded connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of upgraded connections"
    );
    metrics::describe_counter!(
        names::AGENTS_REGISTERED,
        "Total number of agents registered with the hub"
    );
    metrics::describe_gauge!(names::AGENTS_ACTIVE, "Current number of registered agents");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of non-empty rooms");
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Total number of broadcast events");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Total number of payloads enqueued to members"
    );
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Total number of members evicted during fan-out"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames by direction");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total payload bytes by direction");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of connection errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a join rejected before upgrade.
pub fn record_rejection(reason: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => reason).increment(1);
}

/// Metrics guard that records a connection for as long as it lives.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
