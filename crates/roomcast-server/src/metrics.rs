//! Metrics collection and export for roomcast.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "roomcast_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "roomcast_connections_active";
    pub const MESSAGES_TOTAL: &str = "roomcast_messages_total";
    pub const ROOMS_ACTIVE: &str = "roomcast_rooms_active";
    pub const JOINS_TOTAL: &str = "roomcast_joins_total";
    pub const AUTH_FAILURES_TOTAL: &str = "roomcast_auth_failures_total";
    pub const SEND_LATENCY_SECONDS: &str = "roomcast_send_latency_seconds";
    pub const ERRORS_TOTAL: &str = "roomcast_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_gauge!(
        names::ROOMS_ACTIVE,
        "Current number of rooms with subscribers"
    );
    metrics::describe_counter!(names::JOINS_TOTAL, "Total number of room joins");
    metrics::describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of failed authentication attempts"
    );
    metrics::describe_histogram!(
        names::SEND_LATENCY_SECONDS,
        "Send processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed message.
pub fn record_message(direction: &str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
}

/// Record send processing latency.
pub fn record_send_latency(seconds: f64) {
    histogram!(names::SEND_LATENCY_SECONDS).record(seconds);
}

/// Record a room join.
pub fn record_join() {
    counter!(names::JOINS_TOTAL).increment(1);
}

/// Record a failed authentication attempt.
pub fn record_auth_failure() {
    counter!(names::AUTH_FAILURES_TOTAL).increment(1);
}

/// Update the active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error by kind tag.
pub fn record_error(kind: &str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
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
        record_disconnection();
    }
}
