//! Published pipeline state.

use tokio::sync::watch;
use tracing::{error, info};

use irss_models::{PipelineState, RunId};

use crate::error::MediaError;

/// Holds the current [`PipelineState`] of a run and broadcasts changes.
///
/// Illegal transitions are logged and ignored.
#[derive(Debug)]
pub struct Lifecycle {
    run_id: RunId,
    state: watch::Sender<PipelineState>,
}

impl Lifecycle {
    pub fn new(run_id: RunId) -> Self {
        let (state, _) = watch::channel(PipelineState::Building);
        Self { run_id, state }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn advance(&self, next: PipelineState) {
        let run_id = &self.run_id;
        self.state.send_modify(|current| match current.transition(next) {
            Ok(state) => {
                info!(run_id = %run_id, state = %state, "Pipeline state changed");
                *current = state;
            }
            Err(e) => error!(run_id = %run_id, error = %e, "Rejected pipeline transition"),
        });
    }

    /// Move to `Faulted` and hand the setup error back.
    pub fn fault(&self, err: MediaError) -> MediaError {
        error!(run_id = %self.run_id, error = %err, "Pipeline setup failed");
        self.advance(PipelineState::Faulted);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_see_transitions() {
        let lifecycle = Lifecycle::new(RunId::from_string("r"));
        let rx = lifecycle.subscribe();
        lifecycle.advance(PipelineState::Running);
        assert_eq!(*rx.borrow(), PipelineState::Running);
    }

    #[test]
    fn test_illegal_transition_ignored() {
        let lifecycle = Lifecycle::new(RunId::new());
        lifecycle.advance(PipelineState::Completed);
        assert_eq!(lifecycle.current(), PipelineState::Building);
    }

    #[test]
    fn test_fault_returns_error() {
        let lifecycle = Lifecycle::new(RunId::new());
        let err = lifecycle.fault(MediaError::invalid_config("bad"));
        assert!(matches!(err, MediaError::InvalidConfig(_)));
        assert_eq!(lifecycle.current(), PipelineState::Faulted);
    }
}
