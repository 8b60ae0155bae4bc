//! `mask-sky`: run the sky segmentation pipeline over a set of images.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use irss_media::{
    collect_images, default_output_dir, duplicate_mask_outputs, EngineFactory, LogProgress,
    MaskPipeline, OrtEngineFactory,
};
use irss_models::{ExecutionStrategy, ItemId, RunId, RunSummary};

use crate::config::ToolConfig;
use crate::error::{CliError, CliResult};
use crate::logging::RunLogger;
use crate::report;

const COMMAND: &str = "mask-sky";

#[derive(Args, Debug, Clone)]
pub struct MaskSkyArgs {
    /// Image file or directory (searched recursively)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Output directory [default: <input stem>_mask next to the input]
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Execution strategy: cpu, cuda, tensor-rt, directml or auto
    #[arg(long = "engine", default_value_t = ExecutionStrategy::Cpu)]
    pub engine: ExecutionStrategy,

    /// Number of inference replicas (one per GPU); values below 1 become 1
    #[arg(long = "gpu-count", default_value_t = 1, allow_negative_numbers = true)]
    pub gpu_count: i64,

    /// ONNX model path [default: IRSS_MODEL_PATH]
    #[arg(short = 'm', long = "model")]
    pub model: Option<PathBuf>,

    /// Write the run summary as JSON
    #[arg(long = "summary-out")]
    pub summary_out: Option<PathBuf>,

    /// Write the failed items as JSON
    #[arg(long = "failures-out")]
    pub failures_out: Option<PathBuf>,
}

impl MaskSkyArgs {
    pub fn output_dir(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| default_output_dir(&self.input, "_mask"))
    }
}

/// Replica count from the raw flag value.
pub fn clamp_replicas(gpu_count: i64, logger: &RunLogger) -> usize {
    if gpu_count < 1 {
        logger.log_warning(&format!(
            "gpu count must be at least 1, got {}; using 1",
            gpu_count
        ));
        1
    } else {
        gpu_count as usize
    }
}

pub async fn run(
    args: MaskSkyArgs,
    config: &ToolConfig,
    cancel: CancellationToken,
) -> CliResult<RunSummary> {
    if !args.input.exists() {
        return Err(CliError::InputNotFound(args.input));
    }
    let model_path = args.model.clone().unwrap_or_else(|| config.model_path.clone());
    let factory = OrtEngineFactory::from_path(&model_path)?;
    run_with_factory(args, config, Arc::new(factory), cancel).await
}

/// Run with an explicit engine factory.
pub async fn run_with_factory(
    args: MaskSkyArgs,
    config: &ToolConfig,
    factory: Arc<dyn EngineFactory>,
    cancel: CancellationToken,
) -> CliResult<RunSummary> {
    let run_id = RunId::new();
    let logger = RunLogger::new(&run_id, COMMAND);
    let span = logger.create_span();

    async {
        let replicas = clamp_replicas(args.gpu_count, &logger);
        let inputs = collect_images(&args.input)?;
        let output_dir = args.output_dir();

        logger.log_start(&format!(
            "{} images from {} to {} ({} x {})",
            inputs.len(),
            args.input.display(),
            output_dir.display(),
            replicas,
            args.engine
        ));
        if inputs.is_empty() {
            logger.log_warning("no images found");
        }
        for (output, sources) in duplicate_mask_outputs(&inputs, &output_dir) {
            logger.log_warning(&format!(
                "{} inputs write {}; the last one saved wins",
                sources.len(),
                output.display()
            ));
        }

        let pipeline_config = config.mask_pipeline_config(&output_dir, replicas, args.engine);
        let progress = Arc::new(LogProgress::new(COMMAND, config.progress_every));
        let pipeline = MaskPipeline::new(pipeline_config, factory)
            .with_run_id(run_id.clone())
            .with_command(COMMAND);

        let ids = inputs.into_iter().map(ItemId::from).collect();
        let summary = pipeline.run(ids, cancel, progress).await?;

        report::finish(
            &logger,
            &summary,
            args.summary_out.as_deref(),
            args.failures_out.as_deref(),
        )
        .await?;
        Ok(summary)
    }
    .instrument(span)
    .await
}
