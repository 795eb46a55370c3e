//! Prometheus metrics collection for velvetd.
//!
//! Exposed on `GET /metrics` in text format. Tracks socket population,
//! broadcast throughput, and verb outcomes.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Currently connected WebSocket clients across all rooms.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref CLIENTS_CONNECTED: IntGauge = IntGauge::new(
        "velvet_clients_connected",
        "Connected WebSocket clients"
    ).expect("CLIENTS_CONNECTED metric creation failed");

    /// Total frames enqueued to client send queues.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref FRAMES_SENT: IntCounter = IntCounter::new(
        "velvet_frames_sent_total",
        "Frames enqueued for delivery"
    ).expect("FRAMES_SENT metric creation failed");

    /// Frames dropped because a client's send queue was full.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref FRAMES_DROPPED: IntCounter = IntCounter::new(
        "velvet_frames_dropped_total",
        "Frames dropped on full send queues"
    ).expect("FRAMES_DROPPED metric creation failed");

    /// Clients evicted by the heartbeat sweep.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref STALE_EVICTIONS: IntCounter = IntCounter::new(
        "velvet_stale_evictions_total",
        "Clients evicted for missed heartbeats"
    ).expect("STALE_EVICTIONS metric creation failed");

    /// Broadcasts by message type.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref BROADCASTS: IntCounterVec = IntCounterVec::new(
        Opts::new("velvet_broadcasts_total", "Broadcasts by message type"),
        &["type"]
    ).expect("BROADCASTS metric creation failed");

    /// Verb failures by error code.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref VERB_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("velvet_verb_errors_total", "Verb failures by error code"),
        &["code"]
    ).expect("VERB_ERRORS metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Call once at startup; duplicate registration errors are ignored so tests
/// can initialize freely.
pub fn register_metrics() {
    let _ = REGISTRY.register(Box::new(CLIENTS_CONNECTED.clone()));
    let _ = REGISTRY.register(Box::new(FRAMES_SENT.clone()));
    let _ = REGISTRY.register(Box::new(FRAMES_DROPPED.clone()));
    let _ = REGISTRY.register(Box::new(STALE_EVICTIONS.clone()));
    let _ = REGISTRY.register(Box::new(BROADCASTS.clone()));
    let _ = REGISTRY.register(Box::new(VERB_ERRORS.clone()));
}

/// Record a broadcast of the given message type.
pub fn record_broadcast(message_type: &str) {
    BROADCASTS.with_label_values(&[message_type]).inc();
}

/// Record a failed verb by error code.
pub fn record_verb_error(code: &str) {
    VERB_ERRORS.with_label_values(&[code]).inc();
}

/// Gather all metrics in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_registered_metrics() {
        register_metrics();
        FRAMES_SENT.inc();
        record_broadcast("PONG");

        let text = gather_metrics();
        assert!(text.contains("velvet_frames_sent_total"));
        assert!(text.contains("velvet_broadcasts_total"));
    }
}
