//! Metrics collection and export for Herald.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use herald_core::{BrokerStats, PublishOutcome};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "herald_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "herald_connections_active";
    pub const EVENTS_PUBLISHED: &str = "herald_events_published_total";
    pub const DELIVERIES_TOTAL: &str = "herald_deliveries_total";
    pub const DROPPED_CONNECTIONS: &str = "herald_dropped_connections_total";
    pub const CHANNELS_ACTIVE: &str = "herald_channels_active";
    pub const CLIENTS_PRESENT: &str = "herald_clients_present";
    pub const SUBSCRIPTIONS_TOTAL: &str = "herald_subscriptions_total";
    pub const PUBLISH_LATENCY_SECONDS: &str = "herald_publish_latency_seconds";
    pub const ERRORS_TOTAL: &str = "herald_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of event streams opened since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open event streams"
    );
    metrics::describe_counter!(names::EVENTS_PUBLISHED, "Total number of events published");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Total number of events queued on connections"
    );
    metrics::describe_counter!(
        names::DROPPED_CONNECTIONS,
        "Connections dropped because a write failed"
    );
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of channels");
    metrics::describe_gauge!(names::CLIENTS_PRESENT, "Current number of present clients");
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of channel subscriptions"
    );
    metrics::describe_histogram!(
        names::PUBLISH_LATENCY_SECONDS,
        "Publish request processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

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

/// Record the outcome of one published event.
pub fn record_publish(outcome: &PublishOutcome) {
    counter!(names::EVENTS_PUBLISHED).increment(1);
    counter!(names::DELIVERIES_TOTAL).increment(outcome.recipients() as u64);
    if outcome.dropped() > 0 {
        counter!(names::DROPPED_CONNECTIONS).increment(outcome.dropped() as u64);
    }
}

/// Record publish latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::PUBLISH_LATENCY_SECONDS).record(seconds);
}

/// Record subscriptions made by a new stream.
pub fn record_subscriptions(count: usize) {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(count as u64);
}

/// Update gauges from broker statistics.
pub fn record_stats(stats: &BrokerStats) {
    gauge!(names::CHANNELS_ACTIVE).set(stats.channel_count as f64);
    gauge!(names::CLIENTS_PRESENT).set(stats.client_count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
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
