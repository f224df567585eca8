//! Sensing metrics, recorded through the `metrics` facade.
//!
//! The API binary installs the Prometheus recorder; without one these
//! calls are no-ops.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_READ_TOTAL: &str = "nearsense_frames_read_total";
    pub const FRAMES_DETECTED_TOTAL: &str = "nearsense_frames_detected_total";
    pub const READ_FAILURES_TOTAL: &str = "nearsense_read_failures_total";
    pub const DETECTOR_FAILURES_TOTAL: &str = "nearsense_detector_failures_total";
    pub const ENCODE_FAILURES_TOTAL: &str = "nearsense_encode_failures_total";
    pub const CONSUMERS_DROPPED_TOTAL: &str = "nearsense_consumers_dropped_total";
    pub const ACTIVE_CONSUMERS: &str = "nearsense_active_consumers";
    pub const INFERENCE_DURATION_SECONDS: &str = "nearsense_inference_duration_seconds";
    pub const PIPELINE_RUNNING: &str = "nearsense_pipeline_running";
}

pub fn record_frame_read() {
    counter!(names::FRAMES_READ_TOTAL).increment(1);
}

pub fn record_read_failure() {
    counter!(names::READ_FAILURES_TOTAL).increment(1);
}

/// Record a completed detector pass.
pub fn record_detection(duration_secs: f64, people: usize) {
    let labels = [("people", if people > 0 { "present" } else { "absent" })];
    counter!(names::FRAMES_DETECTED_TOTAL, &labels).increment(1);
    histogram!(names::INFERENCE_DURATION_SECONDS).record(duration_secs);
}

pub fn record_detector_failure() {
    counter!(names::DETECTOR_FAILURES_TOTAL).increment(1);
}

pub fn record_encode_failure() {
    counter!(names::ENCODE_FAILURES_TOTAL).increment(1);
}

pub fn record_consumer_dropped() {
    counter!(names::CONSUMERS_DROPPED_TOTAL).increment(1);
}

pub fn set_active_consumers(count: usize) {
    gauge!(names::ACTIVE_CONSUMERS).set(count as f64);
}

pub fn set_pipeline_running(running: bool) {
    gauge!(names::PIPELINE_RUNNING).set(if running { 1.0 } else { 0.0 });
}
