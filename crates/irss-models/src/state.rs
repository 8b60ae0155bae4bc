//! Pipeline lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle of one pipeline run.
///
/// `Building → Running → Draining → Completed`, or `Building → Faulted` when
/// resource setup fails. Item-level failures never lead to `Faulted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Stages, channels and replicas are being constructed
    #[default]
    Building,
    /// Source is emitting; all stage loops are active
    Running,
    /// Source is closed; close signals propagate downstream
    Draining,
    /// Sink consumed every item
    Completed,
    /// Setup failed before any item flowed
    Faulted,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Building => "building",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Completed => "completed",
            PipelineState::Faulted => "faulted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Faulted)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        matches!(
            (self, next),
            (PipelineState::Building, PipelineState::Running)
                | (PipelineState::Building, PipelineState::Faulted)
                | (PipelineState::Running, PipelineState::Draining)
                | (PipelineState::Draining, PipelineState::Completed)
        )
    }

    /// Checked transition.
    pub fn transition(self, next: PipelineState) -> Result<PipelineState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid pipeline transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}
