//! Prometheus Metrics Module
//!
//! Exposes relay metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: Frames received and rejected, reconnects, connection gauge
//! - **Normalizer**: Tickers emitted and suppressed by the price check
//! - **Sinks**: Deliveries and failures per sink
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until `init_metrics` installs the recorder.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Errors raised while installing the metrics recorder.
#[derive(Debug, thiserror::Error)]
#[error("failed to install Prometheus recorder: {0}")]
pub struct MetricsError(String);

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns `MetricsError` if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError(e.to_string()))?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
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
    // Feed
    describe_counter!(
        "crix_relay_frames_received_total",
        "Total raw frames read from the exchange feed"
    );
    describe_counter!(
        "crix_relay_frames_rejected_total",
        "Total frames discarded by the normalizer, by reason"
    );
    describe_counter!(
        "crix_relay_feed_reconnects_total",
        "Total feed reconnect sequences"
    );
    describe_gauge!(
        "crix_relay_feed_connected",
        "1 while the feed session is connected, 0 otherwise"
    );

    // Normalizer
    describe_counter!(
        "crix_relay_tickers_emitted_total",
        "Total tickers emitted after a price change"
    );
    describe_counter!(
        "crix_relay_tickers_suppressed_total",
        "Total events suppressed because the price did not change"
    );

    // Sinks
    describe_counter!(
        "crix_relay_sink_delivered_total",
        "Total tickers delivered by each sink"
    );
    describe_counter!(
        "crix_relay_sink_failures_total",
        "Total sink failures by sink and failure kind"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Redis list sink.
    Cache,
    /// RabbitMQ queue sink.
    Queue,
}

impl SinkKind {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Queue => "queue",
        }
    }
}

/// Record a raw frame read from the feed.
pub fn record_frame_received() {
    counter!("crix_relay_frames_received_total").increment(1);
}

/// Record a frame discarded by the normalizer.
pub fn record_frame_rejected(reason: &'static str) {
    counter!("crix_relay_frames_rejected_total", "reason" => reason).increment(1);
}

/// Record an emitted ticker.
pub fn record_ticker_emitted() {
    counter!("crix_relay_tickers_emitted_total").increment(1);
}

/// Record a suppressed (unchanged price) event.
pub fn record_ticker_suppressed() {
    counter!("crix_relay_tickers_suppressed_total").increment(1);
}

/// Record a feed reconnect sequence.
pub fn record_feed_reconnect() {
    counter!("crix_relay_feed_reconnects_total").increment(1);
}

/// Update the feed connection gauge.
pub fn set_feed_connected(connected: bool) {
    gauge!("crix_relay_feed_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a ticker delivered by a sink.
pub fn record_sink_delivered(sink: SinkKind) {
    counter!("crix_relay_sink_delivered_total", "sink" => sink.as_str()).increment(1);
}

/// Record a sink failure.
pub fn record_sink_failure(sink: SinkKind, kind: &'static str) {
    counter!(
        "crix_relay_sink_failures_total",
        "sink" => sink.as_str(),
        "kind" => kind
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_kind_as_str() {
        assert_eq!(SinkKind::Cache.as_str(), "cache");
        assert_eq!(SinkKind::Queue.as_str(), "queue");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_frame_rejected("decode");
        record_sink_failure(SinkKind::Queue, "publish");
        set_feed_connected(true);
    }
}
