//! Run summaries reported when a pipeline reaches a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::execution::ExecutionStrategy;
use crate::item::{ItemFailure, ItemId};

/// Unique identifier for a command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Occupancy and throughput observed on one bounded channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub name: String,
    pub capacity: usize,
    /// Highest buffered item count observed
    pub high_water: usize,
    /// Items accepted by the channel
    pub sent: u64,
    /// Total time producers spent suspended on a full channel
    pub send_wait_ms: u64,
}

impl ChannelReport {
    /// Occupancy never exceeded the configured capacity.
    pub fn within_capacity(&self) -> bool {
        self.high_water <= self.capacity
    }
}

/// Work done by one replica lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneReport {
    pub lane_id: usize,
    pub strategy: ExecutionStrategy,
    /// Inference calls completed successfully
    pub inferred: u64,
    pub failed: u64,
    /// Cumulative time spent inside inference calls
    pub busy_ms: u64,
    /// Whether the replica survived until the lane drained
    pub healthy: bool,
}

/// Terminal report of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Items that entered the pipeline from the source
    pub emitted: u64,
    pub succeeded: u64,
    /// Identities of items that reached the sink, in completion order
    pub completed: Vec<ItemId>,
    pub failures: Vec<ItemFailure>,
    /// Source was stopped early by cancellation
    pub cancelled: bool,
    #[serde(default)]
    pub channels: Vec<ChannelReport>,
    #[serde(default)]
    pub lanes: Vec<LaneReport>,
    /// Highest number of transforms observed running at once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_concurrency: Option<usize>,
}

impl RunSummary {
    pub fn new(run_id: RunId, command: impl Into<String>) -> Self {
        Self {
            run_id,
            command: command.into(),
            started_at: Utc::now(),
            elapsed_ms: 0,
            emitted: 0,
            succeeded: 0,
            completed: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
            channels: Vec::new(),
            lanes: Vec::new(),
            peak_concurrency: None,
        }
    }

    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }

    /// Every emitted item is accounted for exactly once.
    pub fn is_accounted(&self) -> bool {
        self.succeeded + self.failed() == self.emitted
            && self.completed.len() as u64 == self.succeeded
    }

    /// No item failed and nothing was cut short.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// Identities to hand to retry tooling.
    pub fn failed_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.failures.iter().map(|f| &f.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::FailureStage;

    #[test]
    fn test_accounting() {
        let mut summary = RunSummary::new(RunId::new(), "mask-sky");
        summary.emitted = 3;
        summary.succeeded = 2;
        summary.completed = vec![ItemId::Index(0), ItemId::Index(2)];
        summary
            .failures
            .push(ItemFailure::new(ItemId::Index(1), FailureStage::Load, "bad header"));

        assert!(summary.is_accounted());
        assert!(!summary.is_clean());
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.failed_ids().collect::<Vec<_>>(), vec![&ItemId::Index(1)]);
    }

    #[test]
    fn test_unaccounted_detected() {
        let mut summary = RunSummary::new(RunId::new(), "extract");
        summary.emitted = 5;
        summary.succeeded = 4;
        summary.completed = (0..4).map(ItemId::Index).collect();
        assert!(!summary.is_accounted());
    }

    #[test]
    fn test_channel_report_capacity() {
        let report = ChannelReport {
            name: "loaded".to_string(),
            capacity: 2,
            high_water: 2,
            sent: 10,
            send_wait_ms: 0,
        };
        assert!(report.within_capacity());
    }

    #[test]
    fn test_summary_json_omits_peak_when_absent() {
        let summary = RunSummary::new(RunId::from_string("run-1"), "mask-sky");
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["run_id"], "run-1");
        assert!(json.get("peak_concurrency").is_none());
    }
}
