//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const SESSIONS_ACTIVE: &str = "beacon_sessions_active";
    pub const AUTH_FAILURES_TOTAL: &str = "beacon_auth_failures_total";
    pub const FRAMES_TOTAL: &str = "beacon_frames_total";
    pub const PUBLISH_DELIVERIES_TOTAL: &str = "beacon_publish_deliveries_total";
    pub const REQUEST_TIMEOUTS_TOTAL: &str = "beacon_request_timeouts_total";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
    pub const DISPATCH_SECONDS: &str = "beacon_dispatch_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of accepted connections since server start"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of authenticated sessions");
    metrics::describe_counter!(names::AUTH_FAILURES_TOTAL, "Rejected or timed out handshakes");
    metrics::describe_counter!(names::FRAMES_TOTAL, "Frames processed by command and direction");
    metrics::describe_counter!(
        names::PUBLISH_DELIVERIES_TOTAL,
        "Deliveries produced by publish fan-out"
    );
    metrics::describe_counter!(
        names::REQUEST_TIMEOUTS_TOTAL,
        "Broker-initiated calls that timed out"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");
    metrics::describe_histogram!(names::DISPATCH_SECONDS, "Frame dispatch latency in seconds");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an accepted connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
}

/// Record a failed handshake.
pub fn record_auth_failure() {
    counter!(names::AUTH_FAILURES_TOTAL).increment(1);
}

/// Record a frame.
pub fn record_frame(command: &str, direction: &'static str) {
    counter!(
        names::FRAMES_TOTAL,
        "command" => command.to_string(),
        "direction" => direction
    )
    .increment(1);
}

/// Record publish fan-out.
pub fn record_deliveries(count: usize) {
    counter!(names::PUBLISH_DELIVERIES_TOTAL).increment(count as u64);
}

/// Record a timed out call.
pub fn record_request_timeout() {
    counter!(names::REQUEST_TIMEOUTS_TOTAL).increment(1);
}

/// Record dispatch latency.
pub fn record_dispatch(seconds: f64) {
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Tracks one live session in the active-session gauge.
pub struct SessionMetricsGuard;

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording a session.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::SESSIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for SessionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder() {
        // No recorder installed; every call is a no-op.
        let _guard = SessionMetricsGuard::new();
        record_frame("PUB", "inbound");
        record_deliveries(3);
        record_error("protocol");
    }
}
