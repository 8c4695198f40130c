//! Metrics export for Whisper.
//!
//! The hub and connections record through the `metrics` facade; this
//! module describes those series and serves them in Prometheus format.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use whisper_core::metrics::names;

/// Describe every metric the server emits.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of admitted connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of registered connections"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Events broadcast, by kind");
    metrics::describe_counter!(names::EVENTS_BYTES, "Encoded bytes broadcast, by kind");
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Connections dropped because their outbound queue was full or closed"
    );
    metrics::describe_counter!(
        names::MALFORMED_TOTAL,
        "Submissions dropped because they failed to decode"
    );
    metrics::describe_counter!(
        names::PERSIST_FAILURES_TOTAL,
        "Chat messages that were delivered but not stored, by error class"
    );
    metrics::describe_gauge!(names::ROSTER_SIZE, "Distinct users online");
    metrics::describe_gauge!(names::HUB_AVAILABLE, "1 while the hub task is running");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind or install.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}
