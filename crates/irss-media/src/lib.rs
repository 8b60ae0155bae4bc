//! Concurrent media processing for IRSS tools.
//!
//! This crate provides:
//! - Instrumented bounded channels and a stage runner with per-item failure isolation
//! - A replica pool of exclusively owned inference engines with strategy fallback
//! - The sky-mask pipeline orchestrator (load → prepare/infer lanes → postprocess → save)
//! - A semaphore-gated single-stage runner used by frame extraction
//! - Frame sources (in-memory, FFmpeg raw-video decode) and FFprobe
//! - DJI SRT telemetry parsing and frame tagging

pub mod channel;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fs_utils;
pub mod gated;
pub mod lifecycle;
pub mod mask;
pub mod metrics;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod replica;
pub mod source;
pub mod stage;
pub mod telemetry;

pub use channel::{bounded, ChannelReceiver, ChannelSender, ChannelStats};
pub use engine::{EngineFactory, InferenceEngine, OrtEngineFactory};
pub use error::{MediaError, MediaResult};
pub use extract::{write_spatial_map, FrameSaver};
pub use fs_utils::{collect_images, default_output_dir, duplicate_mask_outputs, natural_cmp};
pub use gated::{ActiveCounter, GatedOutcome, GatedRunner};
pub use lifecycle::Lifecycle;
pub use pipeline::{logical_cores, MaskPipeline, MaskPipelineConfig};
pub use probe::{probe_stream, StreamInfo};
pub use progress::{LogProgress, NoopProgress, ProgressSink};
pub use replica::{Replica, ReplicaPool};
pub use source::{keep_every, FfmpegFrameSource, FrameSource, IterFrameSource, RawFrame};
pub use stage::{spawn_stage, StageSpec};
pub use telemetry::{parse_srt, TelemetryTrack};
