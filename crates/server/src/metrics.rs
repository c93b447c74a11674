//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric definitions for the job lifecycle and the event streams
//! - Helper functions for recording metrics

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use jobstream_core::JobStatus;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    // Lifecycle
    describe_counter!("jobs_started_total", "Jobs created, by capability");
    describe_counter!(
        "jobs_finished_total",
        "Jobs that reached a terminal status, by capability and status"
    );
    describe_histogram!(
        "job_duration_seconds",
        "Wall time from job start to terminal status in seconds"
    );
    describe_counter!(
        "jobs_superseded_total",
        "Jobs cancelled because the same user started a newer one"
    );

    // Streams
    describe_counter!(
        "stream_disconnects_total",
        "Event streams whose client went away before the terminal event"
    );
    describe_counter!("stream_events_total", "Events written to streams, by type");
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_job_started(capability: &str) {
    counter!("jobs_started_total", "capability" => capability.to_string()).increment(1);
}

pub fn record_job_finished(capability: &str, status: JobStatus, elapsed: Duration) {
    counter!(
        "jobs_finished_total",
        "capability" => capability.to_string(),
        "status" => status.as_str()
    )
    .increment(1);
    histogram!("job_duration_seconds", "capability" => capability.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_superseded() {
    counter!("jobs_superseded_total").increment(1);
}

pub fn record_disconnect() {
    counter!("stream_disconnects_total").increment(1);
}

pub fn record_stream_event(event_type: &'static str) {
    counter!("stream_events_total", "type" => event_type).increment(1);
}
