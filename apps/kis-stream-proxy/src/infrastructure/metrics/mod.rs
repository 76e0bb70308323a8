//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: Frames received, records decoded, parse failures
//! - **Delivery**: Events delivered to and dropped by downstream sinks
//! - **Connection**: Upstream state, reconnects, credential failures
//! - **Subscriptions**: Upstream symbols and gateway clients
//! - **Ranking**: Poll outcomes and new entrants
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::StreamKind;
use crate::domain::subscription::Delivery;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics initialization error.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The Prometheus recorder could not be installed.
    #[error("failed to install Prometheus recorder: {0}")]
    Install(#[from] BuildError),
}

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
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
    // Feed counters
    describe_counter!(
        "kis_proxy_frames_received_total",
        "Total text frames received from the KIS feed"
    );
    describe_counter!(
        "kis_proxy_records_decoded_total",
        "Total market data records decoded"
    );
    describe_counter!(
        "kis_proxy_parse_failures_total",
        "Total frames that failed to decode"
    );

    // Delivery counters
    describe_counter!(
        "kis_proxy_events_delivered_total",
        "Total events accepted by downstream sinks"
    );
    describe_counter!(
        "kis_proxy_events_dropped_total",
        "Total events dropped because a sink was full or closed"
    );

    // Connection
    describe_gauge!(
        "kis_proxy_upstream_connected",
        "1 while the upstream WebSocket is connected"
    );
    describe_counter!(
        "kis_proxy_reconnects_total",
        "Total upstream reconnection attempts"
    );
    describe_counter!(
        "kis_proxy_credential_failures_total",
        "Total failed approval key requests"
    );

    // Subscriptions
    describe_gauge!(
        "kis_proxy_subscribed_symbols",
        "Number of symbols subscribed upstream"
    );
    describe_gauge!(
        "kis_proxy_gateway_clients",
        "Number of connected downstream WebSocket clients"
    );

    // Ranking
    describe_counter!(
        "kis_proxy_ranking_polls_total",
        "Total ranking poll cycles by outcome"
    );
    describe_counter!(
        "kis_proxy_ranking_new_entrants_total",
        "Total new entrants detected in the ranking"
    );

    // Latency
    describe_histogram!(
        "kis_proxy_dispatch_seconds",
        "Time to decode and fan out one frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for a ranking poll cycle.
#[derive(Debug, Clone, Copy)]
pub enum PollOutcome {
    /// Ranking fetched and processed.
    Processed,
    /// API returned nothing usable.
    Empty,
    /// Fetch or processing failed.
    Failed,
}

impl PollOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Empty => "empty",
            Self::Failed => "failed",
        }
    }
}

/// Record a text frame received from the feed.
pub fn record_frame_received() {
    counter!("kis_proxy_frames_received_total").increment(1);
}

/// Record a decoded record.
pub fn record_record_decoded(stream: StreamKind) {
    counter!(
        "kis_proxy_records_decoded_total",
        "stream" => stream.as_str()
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_parse_failure(kind: &'static str) {
    counter!(
        "kis_proxy_parse_failures_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record sink delivery outcomes for one dispatch.
pub fn record_deliveries(stream: StreamKind, delivered: u64, dropped: u64, closed: u64) {
    if delivered > 0 {
        counter!(
            "kis_proxy_events_delivered_total",
            "stream" => stream.as_str()
        )
        .increment(delivered);
    }
    if dropped > 0 {
        counter!(
            "kis_proxy_events_dropped_total",
            "reason" => delivery_label(Delivery::Dropped)
        )
        .increment(dropped);
    }
    if closed > 0 {
        counter!(
            "kis_proxy_events_dropped_total",
            "reason" => delivery_label(Delivery::Closed)
        )
        .increment(closed);
    }
}

const fn delivery_label(delivery: Delivery) -> &'static str {
    match delivery {
        Delivery::Delivered => "delivered",
        Delivery::Dropped => "full",
        Delivery::Closed => "closed",
    }
}

/// Update the upstream connection gauge.
pub fn set_upstream_connected(connected: bool) {
    gauge!("kis_proxy_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("kis_proxy_reconnects_total").increment(1);
}

/// Record a failed approval key request.
pub fn record_credential_failure() {
    counter!("kis_proxy_credential_failures_total").increment(1);
}

/// Update the subscribed symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribed_symbols(count: usize) {
    gauge!("kis_proxy_subscribed_symbols").set(count as f64);
}

/// Update the gateway client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_gateway_clients(count: usize) {
    gauge!("kis_proxy_gateway_clients").set(count as f64);
}

/// Record a ranking poll cycle.
pub fn record_ranking_poll(outcome: PollOutcome) {
    counter!(
        "kis_proxy_ranking_polls_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record newly detected ranking entrants.
pub fn record_new_entrants(count: usize) {
    counter!("kis_proxy_ranking_new_entrants_total")
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record frame processing duration.
pub fn record_dispatch_duration(duration: Duration) {
    histogram!("kis_proxy_dispatch_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_outcome_as_str() {
        assert_eq!(PollOutcome::Processed.as_str(), "processed");
        assert_eq!(PollOutcome::Empty.as_str(), "empty");
        assert_eq!(PollOutcome::Failed.as_str(), "failed");
    }

    #[test]
    fn delivery_labels() {
        assert_eq!(delivery_label(Delivery::Dropped), "full");
        assert_eq!(delivery_label(Delivery::Closed), "closed");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_deliveries(StreamKind::Trade, 1, 1, 1);
        set_upstream_connected(true);
        record_new_entrants(3);
    }
}
