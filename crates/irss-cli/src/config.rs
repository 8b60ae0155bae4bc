//! Tool configuration.

use std::path::PathBuf;
use std::str::FromStr;

use irss_media::{logical_cores, MaskPipelineConfig};
use irss_models::ExecutionStrategy;

use crate::error::{CliError, CliResult};

/// Tool configuration, read from `IRSS_*` environment variables.
///
/// Command-line flags override the values they overlap with.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Capacity of the shared pipeline channels
    pub channel_capacity: usize,
    /// Capacity of each replica lane's input channel
    pub lane_capacity: usize,
    pub load_concurrency: usize,
    pub postprocess_concurrency: usize,
    pub save_concurrency: usize,
    /// Default sky segmentation model
    pub model_path: PathBuf,
    /// Square model input edge in pixels
    pub model_size: u32,
    /// Mask binarisation cutoff
    pub mask_threshold: f32,
    /// Default permit count for frame extraction
    pub max_concurrent_tasks: usize,
    /// Log a progress line every N finished items
    pub progress_every: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        let cores = logical_cores();
        Self {
            channel_capacity: 2,
            lane_capacity: 1,
            load_concurrency: cores,
            postprocess_concurrency: cores,
            save_concurrency: cores,
            model_path: PathBuf::from("models/sky/skyremoval.onnx"),
            model_size: 384,
            mask_threshold: 0.5,
            max_concurrent_tasks: cores,
            progress_every: 25,
        }
    }
}

impl ToolConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup. Unparseable values fall
    /// back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            channel_capacity: parse_or(lookup("IRSS_CHANNEL_CAPACITY"), defaults.channel_capacity),
            lane_capacity: parse_or(lookup("IRSS_LANE_CAPACITY"), defaults.lane_capacity),
            load_concurrency: parse_or(lookup("IRSS_LOAD_CONCURRENCY"), defaults.load_concurrency),
            postprocess_concurrency: parse_or(
                lookup("IRSS_POSTPROCESS_CONCURRENCY"),
                defaults.postprocess_concurrency,
            ),
            save_concurrency: parse_or(lookup("IRSS_SAVE_CONCURRENCY"), defaults.save_concurrency),
            model_path: lookup("IRSS_MODEL_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            model_size: parse_or(lookup("IRSS_MODEL_SIZE"), defaults.model_size),
            mask_threshold: parse_or(lookup("IRSS_MASK_THRESHOLD"), defaults.mask_threshold),
            max_concurrent_tasks: parse_or(
                lookup("IRSS_MAX_CONCURRENT_TASKS"),
                defaults.max_concurrent_tasks,
            ),
            progress_every: parse_or(lookup("IRSS_PROGRESS_EVERY"), defaults.progress_every),
        }
    }

    pub fn validate(&self) -> CliResult<()> {
        let counts = [
            ("IRSS_CHANNEL_CAPACITY", self.channel_capacity),
            ("IRSS_LANE_CAPACITY", self.lane_capacity),
            ("IRSS_LOAD_CONCURRENCY", self.load_concurrency),
            ("IRSS_POSTPROCESS_CONCURRENCY", self.postprocess_concurrency),
            ("IRSS_SAVE_CONCURRENCY", self.save_concurrency),
            ("IRSS_MAX_CONCURRENT_TASKS", self.max_concurrent_tasks),
        ];
        for (key, value) in counts {
            if value == 0 {
                return Err(CliError::config_error(format!("{} must be at least 1", key)));
            }
        }
        if self.model_size == 0 {
            return Err(CliError::config_error("IRSS_MODEL_SIZE must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.mask_threshold) {
            return Err(CliError::config_error(format!(
                "IRSS_MASK_THRESHOLD {} outside [0, 1]",
                self.mask_threshold
            )));
        }
        Ok(())
    }

    /// Pipeline settings for one mask run.
    pub fn mask_pipeline_config(
        &self,
        output_dir: impl Into<PathBuf>,
        replicas: usize,
        strategy: ExecutionStrategy,
    ) -> MaskPipelineConfig {
        let mut config = MaskPipelineConfig::new(output_dir);
        config.replicas = replicas;
        config.strategy = strategy;
        config.load_concurrency = self.load_concurrency;
        config.postprocess_concurrency = self.postprocess_concurrency;
        config.save_concurrency = self.save_concurrency;
        config.channel_capacity = self.channel_capacity;
        config.lane_capacity = self.lane_capacity;
        config.model_size = self.model_size;
        config.threshold = self.mask_threshold;
        config
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}
