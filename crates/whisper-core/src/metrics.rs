//! Metric names and recorders.
//!
//! Recording goes through the `metrics` facade, so these calls are no-ops
//! until the server installs an exporter.

use metrics::{counter, gauge};
use whisper_protocol::EventKind;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "whisper_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "whisper_connections_active";
    pub const EVENTS_TOTAL: &str = "whisper_events_total";
    pub const EVENTS_BYTES: &str = "whisper_events_bytes";
    pub const EVICTIONS_TOTAL: &str = "whisper_evictions_total";
    pub const MALFORMED_TOTAL: &str = "whisper_malformed_total";
    pub const PERSIST_FAILURES_TOTAL: &str = "whisper_persist_failures_total";
    pub const ROSTER_SIZE: &str = "whisper_roster_size";
    pub const HUB_AVAILABLE: &str = "whisper_hub_available";
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

/// Record one broadcast event.
pub fn record_event(kind: EventKind, bytes: usize) {
    counter!(names::EVENTS_TOTAL, "kind" => kind.as_str()).increment(1);
    counter!(names::EVENTS_BYTES, "kind" => kind.as_str()).increment(bytes as u64);
}

/// Record a slow-consumer eviction.
pub fn record_eviction() {
    counter!(names::EVICTIONS_TOTAL).increment(1);
}

/// Record a submission dropped because it failed to decode.
pub fn record_malformed() {
    counter!(names::MALFORMED_TOTAL).increment(1);
}

/// Record a chat message that never reached the store.
pub fn record_persist_failure(class: &'static str) {
    counter!(names::PERSIST_FAILURES_TOTAL, "class" => class).increment(1);
}

/// Update the online roster size.
pub fn set_roster_size(size: usize) {
    gauge!(names::ROSTER_SIZE).set(size as f64);
}

/// Update hub availability (1 = running).
pub fn set_hub_available(available: bool) {
    gauge!(names::HUB_AVAILABLE).set(if available { 1.0 } else { 0.0 });
}

/// Guard that records a connection on creation and its end on drop.
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
