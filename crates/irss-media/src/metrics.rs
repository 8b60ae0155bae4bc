//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; nothing is emitted unless the
//! embedding binary installs a recorder.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    // Channel metrics
    pub const CHANNEL_OCCUPANCY: &str = "irss_channel_occupancy";
    pub const CHANNEL_SEND_WAIT_SECONDS: &str = "irss_channel_send_wait_seconds";

    // Item metrics
    pub const ITEMS_SUCCEEDED_TOTAL: &str = "irss_items_succeeded_total";
    pub const ITEMS_FAILED_TOTAL: &str = "irss_items_failed_total";

    // Inference metrics
    pub const INFERENCE_DURATION_SECONDS: &str = "irss_inference_duration_seconds";

    // Gated variant
    pub const GATED_ACTIVE_PERMITS: &str = "irss_gated_active_permits";
}

/// Record the buffered item count of a channel after a send.
pub fn record_channel_occupancy(channel: &str, occupancy: usize) {
    let labels = [("channel", channel.to_string())];
    gauge!(names::CHANNEL_OCCUPANCY, &labels).set(occupancy as f64);
}

/// Record how long a producer was suspended on a full channel.
pub fn record_send_wait(channel: &str, wait_secs: f64) {
    let labels = [("channel", channel.to_string())];
    histogram!(names::CHANNEL_SEND_WAIT_SECONDS, &labels).record(wait_secs);
}

/// Record an item that left a stage on the success path.
pub fn record_item_succeeded(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::ITEMS_SUCCEEDED_TOTAL, &labels).increment(1);
}

/// Record an item routed to the failure channel.
pub fn record_item_failed(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::ITEMS_FAILED_TOTAL, &labels).increment(1);
}

/// Record one inference call on a replica lane.
pub fn record_inference(lane: usize, strategy: &str, duration_secs: f64) {
    let labels = [("lane", lane.to_string()), ("strategy", strategy.to_string())];
    histogram!(names::INFERENCE_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record the number of permits currently held in the gated variant.
pub fn record_active_permits(active: usize) {
    gauge!(names::GATED_ACTIVE_PERMITS).set(active as f64);
}
