//! Stage runner.
//!
//! A stage is `concurrency` worker tasks competing on one input channel. Each
//! worker receives an item, runs the transform on the blocking pool and sends
//! the result downstream. Errors and panics inside the transform are caught
//! per item and routed to the failure channel, so a bad item never ends the
//! worker loop.
//!
//! The stage's output closes when the last worker exits, which happens only
//! after the input is closed and drained.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use irss_models::{FailureStage, Item, ItemFailure, ItemId};

use crate::channel::{ChannelReceiver, ChannelSender};
use crate::error::MediaResult;
use crate::metrics;

/// Static shape of one stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Name used in logs and metrics
    pub name: String,
    /// Stage recorded on failures raised here
    pub stage: FailureStage,
    /// Transforms allowed to run at once within this stage
    pub concurrency: usize,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, stage: FailureStage, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            stage,
            concurrency: concurrency.max(1),
        }
    }
}

/// Report an item failure; logs when the failure channel itself is gone.
pub async fn report_failure(failures: &ChannelSender<ItemFailure>, failure: ItemFailure) {
    warn!(
        item = %failure.id,
        stage = %failure.stage,
        reason = %failure.reason,
        "Item failed"
    );
    metrics::record_item_failed(failure.stage.as_str());
    if let Err(e) = failures.send(failure).await {
        let lost = e.into_inner();
        error!(item = %lost.id, "Failure channel closed; failure not recorded");
    }
}

/// Spawn the workers of one stage into `tasks`.
///
/// `transform` runs via `spawn_blocking` and must not hold async resources.
/// A worker whose downstream has closed records the in-hand item as orphaned
/// and exits; the rest of the input is left to sibling workers or the
/// orchestrator's drain.
pub fn spawn_stage<I, O, F>(
    tasks: &mut JoinSet<()>,
    spec: StageSpec,
    input: ChannelReceiver<Item<I>>,
    output: ChannelSender<Item<O>>,
    failures: ChannelSender<ItemFailure>,
    transform: F,
) where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(&ItemId, I) -> MediaResult<O> + Send + Sync + 'static,
{
    let transform = Arc::new(transform);
    let spec = Arc::new(spec);

    for worker in 0..spec.concurrency {
        let input = input.clone();
        let output = output.clone();
        let failures = failures.clone();
        let transform = Arc::clone(&transform);
        let spec = Arc::clone(&spec);

        tasks.spawn(async move {
            debug!(stage = %spec.name, worker, "Stage worker started");
            run_worker(&spec, input, output, failures, transform).await;
            debug!(stage = %spec.name, worker, "Stage worker finished");
        });
    }
}

async fn run_worker<I, O, F>(
    spec: &StageSpec,
    input: ChannelReceiver<Item<I>>,
    output: ChannelSender<Item<O>>,
    failures: ChannelSender<ItemFailure>,
    transform: Arc<F>,
) where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(&ItemId, I) -> MediaResult<O> + Send + Sync + 'static,
{
    while let Some(item) = input.recv().await {
        let (id, payload) = item.into_parts();
        let task_id = id.clone();
        let f = Arc::clone(&transform);

        let result = tokio::task::spawn_blocking(move || f(&task_id, payload)).await;

        let failure = match result {
            Ok(Ok(out)) => match output.send(Item::new(id, out)).await {
                Ok(()) => {
                    metrics::record_item_succeeded(&spec.name);
                    continue;
                }
                Err(e) => {
                    let orphan = e.into_inner();
                    report_failure(
                        &failures,
                        ItemFailure::new(
                            orphan.id,
                            FailureStage::Orphaned,
                            format!("{} output closed", spec.name),
                        ),
                    )
                    .await;
                    return;
                }
            },
            Ok(Err(err)) => ItemFailure::new(id, spec.stage, err.to_string()),
            Err(join_err) => ItemFailure::new(
                id,
                spec.stage,
                format!("{} transform panicked: {}", spec.name, join_err),
            ),
        };

        report_failure(&failures, failure).await;
    }
}
