//! Shared data models for IRSS media tools.
//!
//! This crate provides Serde-serializable types for:
//! - Pipeline items, identities and per-item failures
//! - Execution strategies and their fallback order
//! - Pipeline lifecycle states
//! - Run summaries, channel and lane reports
//! - Flight telemetry records used to tag extracted frames
//! - Output file naming

pub mod execution;
pub mod item;
pub mod naming;
pub mod state;
pub mod summary;
pub mod telemetry;

// Re-export common types
pub use execution::{ExecutionStrategy, ExecutionStrategyParseError};
pub use item::{FailureStage, Item, ItemFailure, ItemId};
pub use naming::{frame_output_path, mask_output_path, MASK_SUFFIX};
pub use state::{InvalidTransition, PipelineState};
pub use summary::{ChannelReport, LaneReport, RunId, RunSummary};
pub use telemetry::{SpatialMapEntry, TelemetryRecord};
