//! Prometheus Metrics Module
//!
//! Exposes bridge metrics in Prometheus format at `/metrics` on the query
//! server port.
//!
//! # Metrics
//!
//! - **Records**: accepted records and rejected segments by reason
//! - **Connection**: attempts, errors by kind, and current link state
//! - **Cadence**: interval between consecutive accepted records

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
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
    describe_counter!(
        "lighthouse_bridge_records_accepted_total",
        "Beacon records accepted into the snapshot"
    );
    describe_counter!(
        "lighthouse_bridge_segments_rejected_total",
        "Segments discarded, labelled by reason"
    );

    describe_counter!(
        "lighthouse_bridge_connection_attempts_total",
        "TCP connection attempts to the beacon"
    );
    describe_counter!(
        "lighthouse_bridge_connection_errors_total",
        "Beacon connection failures, labelled by kind"
    );
    describe_gauge!(
        "lighthouse_bridge_beacon_connected",
        "1 while streaming from the beacon, 0 otherwise"
    );

    describe_histogram!(
        "lighthouse_bridge_record_interval_seconds",
        "Time between consecutive accepted records"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an accepted beacon record.
pub fn record_record_accepted() {
    counter!("lighthouse_bridge_records_accepted_total").increment(1);
}

/// Record a discarded segment.
pub fn record_segment_rejected(reason: &'static str) {
    counter!(
        "lighthouse_bridge_segments_rejected_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a connection attempt.
pub fn record_connection_attempt() {
    counter!("lighthouse_bridge_connection_attempts_total").increment(1);
}

/// Record a connection failure.
pub fn record_connection_error(kind: &'static str) {
    counter!(
        "lighthouse_bridge_connection_errors_total",
        "kind" => kind
    )
    .increment(1);
}

/// Update the link gauge.
pub fn set_beacon_connected(connected: bool) {
    gauge!("lighthouse_bridge_beacon_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record the gap since the previous accepted record.
pub fn record_record_interval(interval: Duration) {
    histogram!("lighthouse_bridge_record_interval_seconds").record(interval.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
