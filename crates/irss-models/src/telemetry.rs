//! Flight telemetry attached to extracted frames.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One subtitle block of a DJI flight log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Block start relative to the start of the video, in milliseconds
    pub start_ms: u64,
    /// Block end (exclusive), in milliseconds
    pub end_ms: u64,
    pub frame_count: u32,
    pub diff_time_ms: u32,
    pub iso: u32,
    pub shutter: String,
    pub fnum: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub relative_altitude: f64,
    pub absolute_altitude: f64,
}

impl TelemetryRecord {
    /// Whether the block covers the given timestamp.
    pub fn covers(&self, timestamp_ms: u64) -> bool {
        self.start_ms <= timestamp_ms && timestamp_ms < self.end_ms
    }
}

/// Spatial mapping entry written for each saved frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialMapEntry {
    pub frame: PathBuf,
    pub index: u64,
    pub timestamp_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetryRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers_is_half_open() {
        let record = TelemetryRecord {
            start_ms: 0,
            end_ms: 33,
            frame_count: 1,
            diff_time_ms: 33,
            iso: 100,
            shutter: "1/1000.0".to_string(),
            fnum: 2.8,
            latitude: 47.1,
            longitude: 8.5,
            relative_altitude: 50.0,
            absolute_altitude: 480.0,
        };
        assert!(record.covers(0));
        assert!(record.covers(32));
        assert!(!record.covers(33));
    }
}
