//! Sky-mask pipeline orchestrator.
//!
//! ```text
//!                         ┌ prepare-0 ─ lane-0 ─ infer-0 ┐
//! source ─ load ─ loaded ─┤            ...               ├─ inferred ─ postprocess ─ artifacts ─ save ─ saved
//!                         └ prepare-R ─ lane-R ─ infer-R ┘
//!                    every stage ──────────────────────────────────────────── failures
//! ```
//!
//! Every edge is a bounded channel. Lanes compete for `loaded` and merge
//! into `inferred`, so completion order is unrelated to input order; callers
//! get the set of completed identities, not a sequence.
//!
//! Replicas are built before the source starts. If no replica can be built
//! the run faults and nothing is emitted. Item-level errors go to the
//! failure channel and never fault the run.
//!
//! Cancellation stops the source. Items already admitted run to completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use irss_models::{
    ExecutionStrategy, FailureStage, Item, ItemFailure, ItemId, LaneReport, PipelineState, RunId,
    RunSummary,
};

use crate::channel::{bounded, ChannelStats};
use crate::engine::EngineFactory;
use crate::error::{MediaError, MediaResult};
use crate::lifecycle::Lifecycle;
use crate::mask::{self, InferredFrame, LoadedFrame, MaskArtifact, PreparedFrame};
use crate::progress::ProgressSink;
use crate::replica::{run_infer_lane, ReplicaPool};
use crate::stage::{report_failure, spawn_stage, StageSpec};

/// Logical core count, used as the default degree of CPU-bound stages.
pub fn logical_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Topology and resource settings of one mask run.
#[derive(Debug, Clone)]
pub struct MaskPipelineConfig {
    /// Replica lanes (one inference session each)
    pub replicas: usize,
    /// Requested strategy; each lane walks its fallback chain
    pub strategy: ExecutionStrategy,
    pub load_concurrency: usize,
    pub postprocess_concurrency: usize,
    pub save_concurrency: usize,
    /// Capacity of the shared channels
    pub channel_capacity: usize,
    /// Capacity of each lane's prepare → infer channel
    pub lane_capacity: usize,
    pub output_dir: PathBuf,
    /// Square model input edge
    pub model_size: u32,
    /// Binarisation cutoff in `[0, 1]`
    pub threshold: f32,
}

impl MaskPipelineConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let cores = logical_cores();
        Self {
            replicas: 1,
            strategy: ExecutionStrategy::default(),
            load_concurrency: cores,
            postprocess_concurrency: cores,
            save_concurrency: cores,
            channel_capacity: 2,
            lane_capacity: 1,
            output_dir: output_dir.into(),
            model_size: 384,
            threshold: 0.5,
        }
    }

    /// Reject settings that would stall or misbehave.
    pub fn validate(&self) -> MediaResult<()> {
        let counts = [
            ("replicas", self.replicas),
            ("load_concurrency", self.load_concurrency),
            ("postprocess_concurrency", self.postprocess_concurrency),
            ("save_concurrency", self.save_concurrency),
            ("channel_capacity", self.channel_capacity),
            ("lane_capacity", self.lane_capacity),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(MediaError::invalid_config(format!("{} must be at least 1", name)));
            }
        }
        if self.model_size == 0 {
            return Err(MediaError::invalid_config("model_size must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(MediaError::invalid_config(format!(
                "threshold {} outside [0, 1]",
                self.threshold
            )));
        }
        Ok(())
    }

    /// Upper bound on items buffered across all channels.
    pub fn buffered_item_bound(&self) -> usize {
        // source, loaded, inferred, artifacts, saved, failures + one per lane
        6 * self.channel_capacity + self.replicas * self.lane_capacity
    }
}

/// One mask run, consumed by [`MaskPipeline::run`].
pub struct MaskPipeline {
    config: MaskPipelineConfig,
    factory: Arc<dyn EngineFactory>,
    command: String,
    lifecycle: Lifecycle,
}

impl MaskPipeline {
    pub fn new(config: MaskPipelineConfig, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            config,
            factory,
            command: "mask-sky".to_string(),
            lifecycle: Lifecycle::new(RunId::new()),
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

    pub fn config(&self) -> &MaskPipelineConfig {
        &self.config
    }

    /// Observe lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.lifecycle.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        self.lifecycle.current()
    }

    /// Run every identity in `ids` through the pipeline.
    ///
    /// Returns `Err` only for setup failures, with the state left at
    /// `Faulted`. Otherwise every emitted identity appears exactly once in
    /// the summary, as completed or failed.
    #[instrument(skip_all, name = "mask_pipeline", fields(run_id = %self.lifecycle.run_id()))]
    pub async fn run(
        self,
        ids: Vec<ItemId>,
        cancel: CancellationToken,
        progress: Arc<dyn ProgressSink>,
    ) -> MediaResult<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new(self.lifecycle.run_id().clone(), self.command.clone());
        let cfg = self.config.clone();
        let lifecycle = &self.lifecycle;

        // ── Building ──
        cfg.validate().map_err(|e| lifecycle.fault(e))?;
        tokio::fs::create_dir_all(&cfg.output_dir)
            .await
            .map_err(|e| lifecycle.fault(MediaError::Io(e)))?;

        let factory = Arc::clone(&self.factory);
        let (strategy, replicas) = (cfg.strategy, cfg.replicas);
        let pool = tokio::task::spawn_blocking(move || {
            ReplicaPool::build(factory.as_ref(), strategy, replicas)
        })
        .await
        .map_err(|e| lifecycle.fault(MediaError::internal(format!("Replica setup panicked: {}", e))))?
        .map_err(|e| lifecycle.fault(e))?;

        info!(
            replicas = pool.len(),
            strategies = ?pool.strategies(),
            "Replica pool ready"
        );

        let cap = cfg.channel_capacity;
        let (source_tx, source_rx) = bounded::<Item<()>>("source", cap);
        let (loaded_tx, loaded_rx) = bounded::<Item<LoadedFrame>>("loaded", cap);
        let (inferred_tx, inferred_rx) = bounded::<Item<InferredFrame>>("inferred", cap);
        let (artifacts_tx, artifacts_rx) = bounded::<Item<MaskArtifact>>("artifacts", cap);
        let (saved_tx, saved_rx) = bounded::<Item<PathBuf>>("saved", cap);
        let (failures_tx, failures_rx) = bounded::<ItemFailure>("failures", cap);

        let mut channel_stats: Vec<Arc<ChannelStats>> = vec![
            source_tx.stats(),
            loaded_tx.stats(),
            inferred_tx.stats(),
            artifacts_tx.stats(),
            saved_tx.stats(),
            failures_tx.stats(),
        ];

        let mut stages = JoinSet::new();
        let mut lanes: JoinSet<LaneReport> = JoinSet::new();

        spawn_stage(
            &mut stages,
            StageSpec::new("load", FailureStage::Load, cfg.load_concurrency),
            source_rx,
            loaded_tx,
            failures_tx.clone(),
            |id, ()| mask::load_image(id),
        );

        let model_size = cfg.model_size;
        for replica in pool.into_replicas() {
            let lane_id = replica.lane_id();
            let (lane_tx, lane_rx) =
                bounded::<Item<PreparedFrame>>(format!("lane-{}", lane_id), cfg.lane_capacity);
            channel_stats.push(lane_tx.stats());

            spawn_stage(
                &mut stages,
                StageSpec::new(format!("prepare-{}", lane_id), FailureStage::Prepare, 1),
                loaded_rx.clone(),
                lane_tx,
                failures_tx.clone(),
                move |_, frame: LoadedFrame| mask::prepare(frame, model_size),
            );
            lanes.spawn(run_infer_lane(
                replica,
                lane_rx,
                inferred_tx.clone(),
                failures_tx.clone(),
            ));
        }
        drop(inferred_tx);

        let threshold = cfg.threshold;
        spawn_stage(
            &mut stages,
            StageSpec::new("postprocess", FailureStage::Postprocess, cfg.postprocess_concurrency),
            inferred_rx,
            artifacts_tx,
            failures_tx.clone(),
            move |_, frame: InferredFrame| mask::postprocess(frame, threshold),
        );

        let output_dir = cfg.output_dir.clone();
        spawn_stage(
            &mut stages,
            StageSpec::new("save", FailureStage::Save, cfg.save_concurrency),
            artifacts_rx,
            saved_tx,
            failures_tx.clone(),
            move |id, artifact: MaskArtifact| mask::save_mask(id, artifact, &output_dir),
        );

        // Once every lane is gone nothing else consumes `loaded`; whatever is
        // still arriving there is reported instead of dropped.
        let lane_supervisor = {
            let failures = failures_tx.clone();
            tokio::spawn(async move {
                let mut reports = Vec::new();
                while let Some(joined) = lanes.join_next().await {
                    match joined {
                        Ok(report) => reports.push(report),
                        Err(e) => error!(error = %e, "Infer lane task failed"),
                    }
                }
                while let Some(item) = loaded_rx.recv().await {
                    report_failure(
                        &failures,
                        ItemFailure::new(item.id, FailureStage::Orphaned, "no healthy replica lane"),
                    )
                    .await;
                }
                reports.sort_by_key(|r| r.lane_id);
                reports
            })
        };

        let collector = {
            let progress = Arc::clone(&progress);
            tokio::spawn(async move {
                let mut completed = Vec::new();
                let mut failures = Vec::new();
                let (mut saved_open, mut failures_open) = (true, true);
                while saved_open || failures_open {
                    tokio::select! {
                        saved = saved_rx.recv(), if saved_open => match saved {
                            Some(item) => {
                                debug!(item = %item.id, path = %item.payload.display(), "Mask saved");
                                progress.increment(1);
                                completed.push(item.id);
                            }
                            None => saved_open = false,
                        },
                        failure = failures_rx.recv(), if failures_open => match failure {
                            Some(failure) => {
                                progress.increment(1);
                                failures.push(failure);
                            }
                            None => failures_open = false,
                        },
                    }
                }
                (completed, failures)
            })
        };

        // ── Running ──
        progress.set_total(ids.len() as u64);
        lifecycle.advance(PipelineState::Running);

        let source = tokio::spawn(emit_source(ids, source_tx, failures_tx, cancel));
        let (emitted, cancelled) = match source.await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The source's sender is gone, so downstream still closes.
                drain_stages(&mut stages).await;
                let _ = lane_supervisor.await;
                let _ = collector.await;
                return Err(lifecycle.fault(MediaError::internal(format!(
                    "Source task failed: {}",
                    e
                ))));
            }
        };

        // ── Draining ──
        lifecycle.advance(PipelineState::Draining);
        if cancelled {
            warn!(emitted, "Cancelled; draining admitted items");
        }

        drain_stages(&mut stages).await;
        let lane_reports = lane_supervisor.await.map_err(|e| {
            lifecycle.fault(MediaError::internal(format!("Lane supervisor failed: {}", e)))
        })?;
        let (completed, failures) = collector
            .await
            .map_err(|e| lifecycle.fault(MediaError::internal(format!("Collector failed: {}", e))))?;

        // ── Completed ──
        lifecycle.advance(PipelineState::Completed);
        progress.finish();

        summary.emitted = emitted;
        summary.succeeded = completed.len() as u64;
        summary.completed = completed;
        summary.failures = failures;
        summary.cancelled = cancelled;
        summary.channels = channel_stats.iter().map(|s| s.report()).collect();
        summary.lanes = lane_reports;
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        if !summary.is_accounted() {
            error!(
                emitted = summary.emitted,
                succeeded = summary.succeeded,
                failed = summary.failed(),
                "Item accounting mismatch"
            );
        }

        info!(
            emitted = summary.emitted,
            succeeded = summary.succeeded,
            failed = summary.failed(),
            elapsed_ms = summary.elapsed_ms,
            "Mask pipeline completed"
        );

        Ok(summary)
    }
}

/// Wait for every stage worker to exit.
async fn drain_stages(stages: &mut JoinSet<()>) {
    while let Some(joined) = stages.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Stage worker task failed");
        }
    }
}

/// Feed identities into the pipeline until exhausted or cancelled.
///
/// Returns the number of items admitted and whether cancellation stopped
/// the source early.
async fn emit_source(
    ids: Vec<ItemId>,
    tx: crate::channel::ChannelSender<Item<()>>,
    failures: crate::channel::ChannelSender<ItemFailure>,
    cancel: CancellationToken,
) -> (u64, bool) {
    let mut emitted = 0u64;
    let mut cancelled = false;

    for id in ids {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            sent = tx.send(Item::new(id, ())) => match sent {
                Ok(()) => emitted += 1,
                Err(e) => {
                    emitted += 1;
                    let orphan = e.into_inner();
                    report_failure(
                        &failures,
                        ItemFailure::new(orphan.id, FailureStage::Source, "load stage closed"),
                    )
                    .await;
                    break;
                }
            }
        }
    }

    debug!(emitted, cancelled, "Source closed");
    (emitted, cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_stages_waits_for_every_worker() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let done = Arc::new(AtomicUsize::new(0));
        let mut stages = JoinSet::new();
        for ms in [5u64, 20, 40] {
            let done = Arc::clone(&done);
            stages.spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        stages.spawn(async { panic!("worker died") });

        drain_stages(&mut stages).await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(stages.is_empty());
    }

    #[test]
    fn test_default_config_is_valid() {
        let cfg = MaskPipelineConfig::new("/tmp/out");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.channel_capacity, 2);
        assert_eq!(cfg.lane_capacity, 1);
        assert_eq!(cfg.model_size, 384);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut cfg = MaskPipelineConfig::new("/tmp/out");
        cfg.channel_capacity = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("channel_capacity"));
        assert!(err.is_setup_fatal());
    }

    #[test]
    fn test_threshold_range() {
        let mut cfg = MaskPipelineConfig::new("/tmp/out");
        cfg.threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_buffered_bound() {
        let mut cfg = MaskPipelineConfig::new("/tmp/out");
        cfg.replicas = 2;
        assert_eq!(cfg.buffered_item_bound(), 6 * 2 + 2);
    }
}
