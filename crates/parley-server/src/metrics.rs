//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const AUTH_FAILURES_TOTAL: &str = "parley_auth_failures_total";
    pub const ONLINE_USERS: &str = "parley_online_users";
    pub const INBOUND_EVENTS_TOTAL: &str = "parley_inbound_events_total";
    pub const DELIVERIES_TOTAL: &str = "parley_deliveries_total";
    pub const DELIVERY_FAILURES_TOTAL: &str = "parley_delivery_failures_total";
    pub const MESSAGES_PERSISTED_TOTAL: &str = "parley_messages_persisted_total";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of authenticated connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of registered connections"
    );
    metrics::describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Handshakes rejected, by reason"
    );
    metrics::describe_gauge!(names::ONLINE_USERS, "Users with at least one live connection");
    metrics::describe_counter!(
        names::INBOUND_EVENTS_TOTAL,
        "Client events received, by kind"
    );
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Events queued on connections, by event"
    );
    metrics::describe_counter!(
        names::DELIVERY_FAILURES_TOTAL,
        "Events a connection could not accept, by event"
    );
    metrics::describe_counter!(names::MESSAGES_PERSISTED_TOTAL, "Chat messages stored");
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

/// Record a registered connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a deregistered connection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a rejected handshake.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Update the online user count.
pub fn set_online_users(count: usize) {
    gauge!(names::ONLINE_USERS).set(count as f64);
}

/// Record an event received from a client.
pub fn record_inbound(kind: &'static str) {
    counter!(names::INBOUND_EVENTS_TOTAL, "kind" => kind).increment(1);
}

/// Record the outcome of routing one event.
pub fn record_delivery(event: &'static str, delivered: usize, failed: usize) {
    counter!(names::DELIVERIES_TOTAL, "event" => event).increment(delivered as u64);
    if failed > 0 {
        counter!(names::DELIVERY_FAILURES_TOTAL, "event" => event).increment(failed as u64);
    }
}

/// Record a stored chat message.
pub fn record_persisted() {
    counter!(names::MESSAGES_PERSISTED_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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
