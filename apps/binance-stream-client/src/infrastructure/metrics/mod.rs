//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring. Every
//! recovered failure (malformed frame, duplicate, gap, consumer drop,
//! reconnect) increments a counter here, so degradation is observable
//! without crashing anything.
//!
//! # Metrics Categories
//!
//! - **Frames**: raw frames received, malformed frames dropped
//! - **Sequencing**: duplicates dropped, gaps detected
//! - **Dispatch**: updates dispatched, per-consumer drops
//! - **Connection**: state transitions, reconnection attempts

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frame counters
    describe_counter!(
        "kline_stream_frames_received_total",
        "Total raw frames received from the exchange"
    );
    describe_counter!(
        "kline_stream_malformed_frames_total",
        "Total frames dropped because they failed to decode"
    );

    // Sequencing counters
    describe_counter!(
        "kline_stream_duplicates_dropped_total",
        "Total events discarded as duplicates"
    );
    describe_counter!(
        "kline_stream_gaps_detected_total",
        "Total sequence gaps flagged on admitted events"
    );

    // Dispatch counters
    describe_counter!(
        "kline_stream_updates_dispatched_total",
        "Total updates handed to the dispatcher"
    );
    describe_counter!(
        "kline_stream_consumer_dropped_total",
        "Total updates dropped by consumer backpressure policies"
    );

    // Connection counters and gauges
    describe_counter!(
        "kline_stream_state_transitions_total",
        "Connection state transitions by target state"
    );
    describe_counter!(
        "kline_stream_reconnects_total",
        "Total reconnection attempts"
    );
    describe_gauge!(
        "kline_stream_active_subscriptions",
        "Number of streams in the active subscription set"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one raw frame received from the exchange.
pub fn record_frame_received() {
    counter!("kline_stream_frames_received_total").increment(1);
}

/// Record a frame dropped as malformed.
pub fn record_malformed_frame() {
    counter!("kline_stream_malformed_frames_total").increment(1);
}

/// Record an event discarded as a duplicate.
pub fn record_duplicate_drop(stream: &str) {
    counter!(
        "kline_stream_duplicates_dropped_total",
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record a sequence gap flagged on an admitted event.
pub fn record_gap_detected(stream: &str, width: u64) {
    counter!(
        "kline_stream_gaps_detected_total",
        "stream" => stream.to_string()
    )
    .increment(width);
}

/// Record an update handed to the dispatcher.
pub fn record_event_dispatched() {
    counter!("kline_stream_updates_dispatched_total").increment(1);
}

/// Record an update dropped by a consumer's backpressure policy.
pub fn record_consumer_drop(consumer: &str) {
    counter!(
        "kline_stream_consumer_dropped_total",
        "consumer" => consumer.to_string()
    )
    .increment(1);
}

/// Record a connection state transition.
pub fn set_connection_state(state: &'static str) {
    counter!(
        "kline_stream_state_transitions_total",
        "state" => state
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("kline_stream_reconnects_total").increment(1);
}

/// Update the active subscription gauge.
pub fn set_active_subscriptions(count: f64) {
    gauge!("kline_stream_active_subscriptions").set(count);
}

// =============================================================================
// Tests
// =============================================================================
