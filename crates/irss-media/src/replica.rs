//! Replica pool and inference lanes.
//!
//! A replica is one engine owned by exactly one lane for the whole run. The
//! lane's infer task moves the replica onto the blocking pool for each call
//! and takes it back afterwards, so no second call can reach it while one is
//! in flight.

use std::time::{Duration, Instant};

use ndarray::Array4;
use tracing::{debug, error, info, warn};

use irss_models::{ExecutionStrategy, FailureStage, Item, ItemFailure, LaneReport};

use crate::channel::{ChannelReceiver, ChannelSender};
use crate::engine::{EngineFactory, InferenceEngine};
use crate::error::{MediaError, MediaResult};
use crate::metrics;
use crate::stage::report_failure;

/// One exclusively owned inference resource.
pub struct Replica {
    lane_id: usize,
    strategy: ExecutionStrategy,
    engine: Box<dyn InferenceEngine>,
    busy: bool,
}

impl Replica {
    pub fn new(lane_id: usize, strategy: ExecutionStrategy, engine: Box<dyn InferenceEngine>) -> Self {
        Self {
            lane_id,
            strategy,
            engine,
            busy: false,
        }
    }

    pub fn lane_id(&self) -> usize {
        self.lane_id
    }

    /// Strategy that was actually constructed, after fallback.
    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Run one inference call.
    pub fn infer(&mut self, input: Array4<f32>) -> MediaResult<Array4<f32>> {
        if self.busy {
            return Err(MediaError::internal(format!(
                "Replica {} re-entered while busy",
                self.lane_id
            )));
        }
        self.busy = true;
        let result = self.engine.infer(input);
        self.busy = false;
        result
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("lane_id", &self.lane_id)
            .field("strategy", &self.strategy)
            .field("busy", &self.busy)
            .finish()
    }
}

/// The set of replicas built for one run.
#[derive(Debug)]
pub struct ReplicaPool {
    replicas: Vec<Replica>,
}

impl ReplicaPool {
    /// Construct `count` replicas, walking `strategy`'s fallback chain for
    /// each lane.
    ///
    /// Any lane for which no candidate succeeds fails the whole setup.
    pub fn build(
        factory: &dyn EngineFactory,
        strategy: ExecutionStrategy,
        count: usize,
    ) -> MediaResult<Self> {
        let count = count.max(1);
        let chain = strategy.fallback_chain();
        let mut replicas = Vec::with_capacity(count);

        for lane_id in 0..count {
            let mut attempts = Vec::new();
            let mut built = None;

            for candidate in &chain {
                match factory.create(*candidate, lane_id) {
                    Ok(engine) => {
                        built = Some(Replica::new(lane_id, *candidate, engine));
                        break;
                    }
                    Err(e) => {
                        warn!(
                            lane = lane_id,
                            strategy = %candidate,
                            error = %e,
                            "Execution strategy unavailable, trying next"
                        );
                        attempts.push(format!("{}: {}", candidate, e));
                    }
                }
            }

            match built {
                Some(replica) => {
                    info!(
                        lane = lane_id,
                        requested = %strategy,
                        strategy = %replica.strategy(),
                        "Replica ready"
                    );
                    replicas.push(replica);
                }
                None => {
                    return Err(MediaError::NoExecutionStrategy {
                        lane: lane_id,
                        attempts,
                    })
                }
            }
        }

        Ok(Self { replicas })
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn strategies(&self) -> Vec<ExecutionStrategy> {
        self.replicas.iter().map(Replica::strategy).collect()
    }

    /// Hand each replica to its lane.
    pub fn into_replicas(self) -> Vec<Replica> {
        self.replicas
    }
}

/// Payload entering a lane's infer step.
pub trait InferInput: Send + 'static {
    type Output: Send + 'static;

    /// Split into the tensor to infer and the context to carry across.
    fn into_tensor(self) -> (Array4<f32>, InferContext<Self::Output>);
}

/// Context kept aside while the tensor is on the replica.
pub struct InferContext<O> {
    rebuild: Box<dyn FnOnce(Array4<f32>) -> O + Send>,
}

impl<O> InferContext<O> {
    pub fn new(rebuild: impl FnOnce(Array4<f32>) -> O + Send + 'static) -> Self {
        Self {
            rebuild: Box::new(rebuild),
        }
    }

    fn finish(self, output: Array4<f32>) -> O {
        (self.rebuild)(output)
    }
}

/// Counters reported by a lane when it drains.
#[derive(Debug, Default, Clone, Copy)]
struct LaneCounters {
    inferred: u64,
    failed: u64,
    busy: Duration,
}

/// Infer loop of one lane.
///
/// Runs until the lane channel closes. If the replica is lost to a panic the
/// lane closes its input, reports everything still buffered and exits.
pub async fn run_infer_lane<P>(
    replica: Replica,
    input: ChannelReceiver<Item<P>>,
    output: ChannelSender<Item<P::Output>>,
    failures: ChannelSender<ItemFailure>,
) -> LaneReport
where
    P: InferInput,
{
    let lane_id = replica.lane_id();
    let strategy = replica.strategy();
    let mut counters = LaneCounters::default();
    let mut slot = Some(replica);

    debug!(lane = lane_id, %strategy, "Infer lane started");

    while let Some(item) = input.recv().await {
        let (id, payload) = item.into_parts();
        let Some(mut replica) = slot.take() else {
            report_failure(
                &failures,
                ItemFailure::new(id, FailureStage::Orphaned, format!("lane {} has no replica", lane_id)),
            )
            .await;
            break;
        };
        let (tensor, context) = payload.into_tensor();

        let started = Instant::now();
        let joined = tokio::task::spawn_blocking(move || {
            let result = replica.infer(tensor);
            (replica, result)
        })
        .await;
        let elapsed = started.elapsed();
        counters.busy += elapsed;

        match joined {
            Ok((replica, Ok(mask))) => {
                slot = Some(replica);
                counters.inferred += 1;
                metrics::record_inference(lane_id, strategy.as_str(), elapsed.as_secs_f64());
                if let Err(e) = output.send(Item::new(id, context.finish(mask))).await {
                    let orphan = e.into_inner();
                    report_failure(
                        &failures,
                        ItemFailure::new(orphan.id, FailureStage::Orphaned, "inferred output closed"),
                    )
                    .await;
                    break;
                }
            }
            Ok((replica, Err(e))) => {
                slot = Some(replica);
                counters.failed += 1;
                report_failure(&failures, ItemFailure::new(id, FailureStage::Infer, e.to_string()))
                    .await;
            }
            Err(join_err) => {
                counters.failed += 1;
                error!(lane = lane_id, error = %join_err, "Replica lost, retiring lane");
                report_failure(
                    &failures,
                    ItemFailure::new(id, FailureStage::Infer, format!("inference panicked: {}", join_err)),
                )
                .await;
                break;
            }
        }
    }

    // Anything still buffered for this lane will not be inferred here.
    input.close();
    while let Some(item) = input.try_recv() {
        counters.failed += 1;
        report_failure(
            &failures,
            ItemFailure::new(item.id, FailureStage::Orphaned, format!("lane {} retired", lane_id)),
        )
        .await;
    }

    let healthy = slot.is_some();
    debug!(
        lane = lane_id,
        inferred = counters.inferred,
        failed = counters.failed,
        healthy,
        "Infer lane finished"
    );

    LaneReport {
        lane_id,
        strategy,
        inferred: counters.inferred,
        failed: counters.failed,
        busy_ms: counters.busy.as_millis() as u64,
        healthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::bounded;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Identity;

    impl InferenceEngine for Identity {
        fn infer(&mut self, input: Array4<f32>) -> MediaResult<Array4<f32>> {
            let (_, _, h, w) = input.dim();
            Ok(Array4::from_elem((1, 1, h, w), 1.0))
        }
    }

    /// Fails every strategy except the ones listed.
    struct PickyFactory {
        accepts: Vec<ExecutionStrategy>,
        calls: Mutex<Vec<(ExecutionStrategy, usize)>>,
    }

    impl EngineFactory for PickyFactory {
        fn create(
            &self,
            strategy: ExecutionStrategy,
            lane_id: usize,
        ) -> MediaResult<Box<dyn InferenceEngine>> {
            self.calls.lock().unwrap().push((strategy, lane_id));
            if self.accepts.contains(&strategy) {
                Ok(Box::new(Identity))
            } else {
                Err(MediaError::strategy_unavailable(strategy, "not here"))
            }
        }
    }

    #[test]
    fn test_pool_falls_back_to_cpu() {
        let factory = PickyFactory {
            accepts: vec![ExecutionStrategy::Cpu],
            calls: Mutex::new(Vec::new()),
        };
        let pool = ReplicaPool::build(&factory, ExecutionStrategy::TensorRt, 2).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.strategies(), vec![ExecutionStrategy::Cpu; 2]);

        let calls = factory.calls.lock().unwrap();
        assert_eq!(
            &calls[..3],
            &[
                (ExecutionStrategy::TensorRt, 0),
                (ExecutionStrategy::Cuda, 0),
                (ExecutionStrategy::Cpu, 0)
            ]
        );
        assert_eq!(calls.len(), 6);
    }

    #[test]
    fn test_pool_fails_when_chain_exhausted() {
        let factory = PickyFactory {
            accepts: vec![],
            calls: Mutex::new(Vec::new()),
        };
        let err = ReplicaPool::build(&factory, ExecutionStrategy::Cuda, 3).unwrap_err();
        match err {
            MediaError::NoExecutionStrategy { lane, attempts } => {
                assert_eq!(lane, 0);
                assert_eq!(attempts.len(), 2);
                assert!(attempts[0].starts_with("cuda"));
                assert!(attempts[1].starts_with("cpu"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_replicas_clamped() {
        let factory = PickyFactory {
            accepts: vec![ExecutionStrategy::Cpu],
            calls: Mutex::new(Vec::new()),
        };
        let pool = ReplicaPool::build(&factory, ExecutionStrategy::Cpu, 0).unwrap();
        assert_eq!(pool.len(), 1);
    }

    struct Tensor(u32);

    impl InferInput for Tensor {
        type Output = (u32, f32);

        fn into_tensor(self) -> (Array4<f32>, InferContext<Self::Output>) {
            let tag = self.0;
            (
                Array4::zeros((1, 3, 2, 2)),
                InferContext::new(move |mask| (tag, mask[[0, 0, 0, 0]])),
            )
        }
    }

    struct Panicky {
        calls: Arc<AtomicUsize>,
    }

    impl InferenceEngine for Panicky {
        fn infer(&mut self, _input: Array4<f32>) -> MediaResult<Array4<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                panic!("session corrupted");
            }
            Ok(Array4::from_elem((1, 1, 2, 2), 0.5))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lane_runs_until_closed() {
        let (in_tx, in_rx) = bounded("lane-0", 1);
        let (out_tx, out_rx) = bounded("inferred", 8);
        let (fail_tx, fail_rx) = bounded("failures", 8);

        let replica = Replica::new(0, ExecutionStrategy::Cpu, Box::new(Identity));
        let lane = tokio::spawn(run_infer_lane(replica, in_rx, out_tx, fail_tx));
        for i in 0..4u32 {
            in_tx.send(Item::new(i as u64, Tensor(i))).await.unwrap();
        }
        drop(in_tx);

        let report = lane.await.unwrap();
        assert_eq!(report.inferred, 4);
        assert!(report.healthy);

        let mut tags = Vec::new();
        while let Some(item) = out_rx.recv().await {
            assert_eq!(item.payload.1, 1.0);
            tags.push(item.payload.0);
        }
        assert_eq!(tags, vec![0, 1, 2, 3]);
        assert_eq!(fail_rx.recv().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lane_retires_after_panic() {
        let (in_tx, in_rx) = bounded("lane-0", 4);
        let (out_tx, out_rx) = bounded("inferred", 8);
        let (fail_tx, fail_rx) = bounded("failures", 8);

        for i in 0..4u32 {
            in_tx.send(Item::new(i as u64, Tensor(i))).await.unwrap();
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let engine = Panicky {
            calls: Arc::clone(&calls),
        };
        let replica = Replica::new(0, ExecutionStrategy::Cpu, Box::new(engine));
        let report = run_infer_lane(replica, in_rx, out_tx, fail_tx).await;

        assert!(!report.healthy);
        assert_eq!(report.inferred, 1);
        assert_eq!(report.failed, 3);
        assert!(in_tx.send(Item::new(9u64, Tensor(9))).await.is_err());

        assert_eq!(out_rx.recv().await.map(|i| i.payload.0), Some(0));
        let mut failed = Vec::new();
        while let Some(f) = fail_rx.recv().await {
            failed.push(f);
        }
        assert_eq!(failed.len(), 3);
        assert_eq!(failed[0].stage, FailureStage::Infer);
        assert!(failed[1..].iter().all(|f| f.stage == FailureStage::Orphaned));
    }
}
