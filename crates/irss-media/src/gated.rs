//! Semaphore-gated concurrent transform.
//!
//! The single-stage form of the pipeline: a counting semaphore of size `K`
//! admits frames. A permit is acquired before the next frame is pulled from
//! the source and released when that frame's transform finishes, so at most
//! `K` frames are decoded but unfinished at any time and a slow transform
//! throttles the source.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use irss_models::{FailureStage, ItemFailure, ItemId, PipelineState, RunId, RunSummary};

use crate::error::{MediaError, MediaResult};
use crate::lifecycle::Lifecycle;
use crate::metrics;
use crate::progress::ProgressSink;
use crate::source::{FrameSource, RawFrame};

/// Tracks transforms currently running and the highest count seen.
#[derive(Debug, Default)]
pub struct ActiveCounter {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ActiveCounter {
    fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        metrics::record_active_permits(now);
        ActiveGuard(Arc::clone(self))
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ActiveGuard(Arc<ActiveCounter>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let now = self.0.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_active_permits(now);
    }
}

/// Outcome of a gated run: the summary plus each completed item's output.
#[derive(Debug)]
pub struct GatedOutcome<O> {
    pub summary: RunSummary,
    pub outputs: Vec<(ItemId, O)>,
}

/// Runs one transform per frame under a `K`-permit semaphore.
pub struct GatedRunner {
    max_concurrent: usize,
    command: String,
    lifecycle: Lifecycle,
    counter: Arc<ActiveCounter>,
}

impl GatedRunner {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            command: "extract".to_string(),
            lifecycle: Lifecycle::new(RunId::new()),
            counter: Arc::new(ActiveCounter::default()),
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.lifecycle = Lifecycle::new(run_id);
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.lifecycle.subscribe()
    }

    /// Shared view of the active/peak counters.
    pub fn counter(&self) -> Arc<ActiveCounter> {
        Arc::clone(&self.counter)
    }

    /// Pull every frame from `source` and run `transform` on it.
    ///
    /// Frame identities are `ItemId::Index(frame.index)`. A source error is
    /// recorded as a failure and ends the stream; transform errors and panics
    /// fail only their frame.
    #[instrument(skip_all, name = "gated_run", fields(run_id = %self.lifecycle.run_id()))]
    pub async fn run<S, F, O>(
        self,
        mut source: S,
        transform: F,
        cancel: CancellationToken,
        progress: Arc<dyn ProgressSink>,
    ) -> MediaResult<GatedOutcome<O>>
    where
        S: FrameSource,
        F: Fn(&RawFrame) -> MediaResult<O> + Send + Sync + 'static,
        O: Send + 'static,
    {
        let started = Instant::now();
        let lifecycle = &self.lifecycle;
        let mut summary = RunSummary::new(lifecycle.run_id().clone(), self.command.clone());

        if self.max_concurrent == 0 {
            return Err(lifecycle.fault(MediaError::invalid_config(
                "max_concurrent_tasks must be at least 1",
            )));
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let transform = Arc::new(transform);
        let mut tasks: JoinSet<(ItemId, MediaResult<O>)> = JoinSet::new();
        let mut outputs = Vec::new();
        let mut failures = Vec::new();
        let mut pending = HashSet::new();
        let mut emitted = 0u64;
        let mut cancelled = false;
        let mut next_index = 0u64;

        if let Some(total) = source.size_hint() {
            progress.set_total(total);
        }
        lifecycle.advance(PipelineState::Running);

        loop {
            while let Some(joined) = tasks.try_join_next() {
                record(joined, &mut pending, &mut outputs, &mut failures, progress.as_ref());
            }

            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit
                    .map_err(|e| MediaError::internal(format!("Semaphore closed: {}", e)))?,
            };

            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                frame = source.next_frame() => frame,
            };

            let frame = match frame {
                None => break,
                Some(Err(e)) => {
                    emitted += 1;
                    let failure =
                        ItemFailure::new(ItemId::Index(next_index), FailureStage::Source, e.to_string());
                    warn!(item = %failure.id, reason = %failure.reason, "Frame source failed");
                    metrics::record_item_failed(FailureStage::Source.as_str());
                    progress.increment(1);
                    failures.push(failure);
                    break;
                }
                Some(Ok(frame)) => frame,
            };

            emitted += 1;
            next_index = frame.index + 1;
            let id = ItemId::Index(frame.index);
            pending.insert(id.clone());
            let transform = Arc::clone(&transform);
            let counter = Arc::clone(&self.counter);

            tasks.spawn(async move {
                let _permit = permit;
                let task_id = id.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let _active = counter.enter();
                    transform(&frame)
                })
                .await
                .unwrap_or_else(|e| {
                    Err(MediaError::internal(format!(
                        "transform for {} panicked: {}",
                        task_id, e
                    )))
                });
                (id, result)
            });
        }

        lifecycle.advance(PipelineState::Draining);
        if cancelled {
            warn!(emitted, "Cancelled; finishing admitted frames");
        }

        while let Some(joined) = tasks.join_next().await {
            record(joined, &mut pending, &mut outputs, &mut failures, progress.as_ref());
        }
        orphan_unjoined(pending, &mut failures, progress.as_ref());

        lifecycle.advance(PipelineState::Completed);
        progress.finish();

        summary.emitted = emitted;
        summary.succeeded = outputs.len() as u64;
        summary.completed = outputs.iter().map(|(id, _)| id.clone()).collect();
        summary.failures = failures;
        summary.cancelled = cancelled;
        summary.peak_concurrency = Some(self.counter.peak());
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            emitted = summary.emitted,
            succeeded = summary.succeeded,
            failed = summary.failed(),
            peak = self.counter.peak(),
            "Gated run completed"
        );

        Ok(GatedOutcome { summary, outputs })
    }
}

fn record<O>(
    joined: Result<(ItemId, MediaResult<O>), tokio::task::JoinError>,
    pending: &mut HashSet<ItemId>,
    outputs: &mut Vec<(ItemId, O)>,
    failures: &mut Vec<ItemFailure>,
    progress: &dyn ProgressSink,
) {
    let (id, result) = match joined {
        Ok(joined) => joined,
        // The item id went down with the task; it stays pending.
        Err(e) => {
            tracing::error!(error = %e, "Gated task lost");
            return;
        }
    };
    pending.remove(&id);
    progress.increment(1);
    match result {
        Ok(output) => {
            debug!(item = %id, "Frame done");
            metrics::record_item_succeeded("gated");
            outputs.push((id, output));
        }
        Err(e) => {
            warn!(item = %id, error = %e, "Frame failed");
            metrics::record_item_failed(FailureStage::Save.as_str());
            failures.push(ItemFailure::new(id, FailureStage::Save, e.to_string()));
        }
    }
}

/// Record every admitted frame whose task never reported back.
fn orphan_unjoined(
    pending: HashSet<ItemId>,
    failures: &mut Vec<ItemFailure>,
    progress: &dyn ProgressSink,
) {
    let mut lost: Vec<_> = pending.into_iter().collect();
    lost.sort();
    for id in lost {
        warn!(item = %id, "Frame task lost before reporting");
        metrics::record_item_failed(FailureStage::Orphaned.as_str());
        progress.increment(1);
        failures.push(ItemFailure::new(id, FailureStage::Orphaned, "transform task lost"));
    }
}
