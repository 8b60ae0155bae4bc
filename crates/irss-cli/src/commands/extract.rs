//! `extract`: decode a video and save its frames under a permit limit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use irss_media::fs_utils::ensure_dir;
use irss_media::{
    default_output_dir, keep_every, write_spatial_map, FfmpegFrameSource, FrameSaver,
    FrameSource, GatedRunner, LogProgress, RawFrame, TelemetryTrack,
};
use irss_models::{RunId, RunSummary};

use crate::config::ToolConfig;
use crate::error::{CliError, CliResult};
use crate::logging::RunLogger;
use crate::report;

const COMMAND: &str = "extract";

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Input video file
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Output directory [default: <input stem>_frames next to the input]
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Fraction of frames to keep, in (0, 1]; 0.25 keeps every fourth frame
    #[arg(long = "drop", alias = "drop-ratio", default_value_t = 1.0)]
    pub drop: f64,

    /// Image format of the saved frames
    #[arg(long = "format", default_value = "png")]
    pub format: String,

    /// Frames decoded but not yet saved at any time [default: IRSS_MAX_CONCURRENT_TASKS]
    #[arg(long = "max-concurrent-tasks")]
    pub max_concurrent_tasks: Option<usize>,

    /// DJI telemetry subtitle file used to tag frames
    #[arg(long = "SRT")]
    pub srt: Option<PathBuf>,

    /// Write the frame-to-telemetry mapping as JSON
    #[arg(long = "SOUT")]
    pub spatial_out: Option<PathBuf>,

    /// Write the run summary as JSON
    #[arg(long = "summary-out")]
    pub summary_out: Option<PathBuf>,

    /// Write the failed frames as JSON
    #[arg(long = "failures-out")]
    pub failures_out: Option<PathBuf>,
}

impl ExtractArgs {
    pub fn output_dir(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| default_output_dir(&self.input, "_frames"))
    }
}

fn require_file(path: &Path) -> CliResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(CliError::InputNotFound(path.to_path_buf()))
    }
}

pub async fn run(
    args: ExtractArgs,
    config: &ToolConfig,
    cancel: CancellationToken,
) -> CliResult<RunSummary> {
    require_file(&args.input)?;
    let keep = keep_every(args.drop)?;

    let telemetry = match &args.srt {
        Some(path) => {
            require_file(path)?;
            Some(Arc::new(TelemetryTrack::load(path).await?))
        }
        None => None,
    };

    let source = FfmpegFrameSource::open(&args.input, keep).await?;
    run_with_source(args, config, source, telemetry, cancel).await
}

/// Run over an already opened frame source.
pub async fn run_with_source<S: FrameSource>(
    args: ExtractArgs,
    config: &ToolConfig,
    source: S,
    telemetry: Option<Arc<TelemetryTrack>>,
    cancel: CancellationToken,
) -> CliResult<RunSummary> {
    let run_id = RunId::new();
    let logger = RunLogger::new(&run_id, COMMAND);
    let span = logger.create_span();

    async {
        let permits = args.max_concurrent_tasks.unwrap_or(config.max_concurrent_tasks);
        if permits == 0 {
            return Err(CliError::invalid_argument(
                "--max-concurrent-tasks must be at least 1",
            ));
        }

        let output_dir = args.output_dir();
        ensure_dir(&output_dir).await?;

        let mut saver = FrameSaver::new(&output_dir).with_extension(args.format.as_str());
        match telemetry {
            Some(track) if track.is_empty() => {
                logger.log_warning("telemetry file has no usable records; frames stay untagged");
            }
            Some(track) => {
                logger.log_progress(&format!("{} telemetry records loaded", track.len()));
                saver = saver.with_telemetry(track);
            }
            None => {}
        }

        logger.log_start(&format!(
            "{} to {} with {} permits",
            args.input.display(),
            output_dir.display(),
            permits
        ));

        let progress = Arc::new(LogProgress::new(COMMAND, config.progress_every));
        let outcome = GatedRunner::new(permits)
            .with_run_id(run_id.clone())
            .with_command(COMMAND)
            .run(
                source,
                move |frame: &RawFrame| saver.save(frame),
                cancel,
                progress,
            )
            .await?;

        if let Some(path) = &args.spatial_out {
            let entries: Vec<_> = outcome.outputs.into_iter().map(|(_, entry)| entry).collect();
            write_spatial_map(path, &entries).await?;
            logger.log_progress(&format!(
                "spatial map with {} frames written to {}",
                entries.len(),
                path.display()
            ));
        }

        report::finish(
            &logger,
            &outcome.summary,
            args.summary_out.as_deref(),
            args.failures_out.as_deref(),
        )
        .await?;
        Ok(outcome.summary)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use irss_media::{parse_srt, IterFrameSource, MediaResult};
    use irss_models::SpatialMapEntry;
    use std::time::Duration;
    use tempfile::TempDir;

    fn args(input: PathBuf, output: PathBuf) -> ExtractArgs {
        ExtractArgs {
            input,
            output: Some(output),
            drop: 1.0,
            format: "png".to_string(),
            max_concurrent_tasks: Some(3),
            srt: None,
            spatial_out: None,
            summary_out: None,
            failures_out: None,
        }
    }

    fn frames(n: u64) -> IterFrameSource<impl Iterator<Item = MediaResult<RawFrame>> + Send> {
        IterFrameSource::new((0..n).map(|index| {
            Ok(RawFrame {
                index,
                timestamp: Duration::from_millis(index * 500),
                image: RgbImage::new(4, 4),
            })
        }))
        .with_size_hint(n)
    }

    #[test]
    fn test_default_output_dir() {
        let args = ExtractArgs {
            output: None,
            ..args(PathBuf::from("/videos/DJI_0042.MP4"), PathBuf::new())
        };
        assert_eq!(args.output_dir(), PathBuf::from("/videos/DJI_0042_frames"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_frames_and_spatial_map_written() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("frames");
        let map = dir.path().join("spatial.json");
        let srt = "1\n00:00:00,000 --> 00:00:01,000\nFrameCnt: 1, DiffTime: 1000ms\n[iso: 100] [shutter: 1/500.0] [fnum: 2.8] [latitude: 46.5] [longitude: 7.9] [rel_alt: 50.000 abs_alt: 1200.000]\n";
        let track = Arc::new(TelemetryTrack::new(parse_srt(srt)));

        let mut args = args(dir.path().join("DJI_0001.MP4"), out.clone());
        args.spatial_out = Some(map.clone());

        let summary = run_with_source(
            args,
            &ToolConfig::default(),
            frames(6),
            Some(track),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 6);
        assert!(summary.peak_concurrency.unwrap() <= 3);
        assert!(out.join("5.png").exists());

        let entries: Vec<SpatialMapEntry> =
            serde_json::from_slice(&std::fs::read(&map).unwrap()).unwrap();
        assert_eq!(entries.len(), 6);
        // 0 ms and 500 ms fall inside the single record; 1000 ms and later do not.
        assert!(entries[0].telemetry.is_some());
        assert!(entries[1].telemetry.is_some());
        assert!(entries[3].telemetry.is_none());
    }

    #[tokio::test]
    async fn test_zero_permits_rejected() {
        let dir = TempDir::new().unwrap();
        let mut args = args(dir.path().join("v.mp4"), dir.path().join("out"));
        args.max_concurrent_tasks = Some(0);

        let err = run_with_source(args, &ToolConfig::default(), frames(1), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_setup_fatal());
    }

    #[tokio::test]
    async fn test_missing_video_rejected() {
        let dir = TempDir::new().unwrap();
        let err = run(
            args(dir.path().join("missing.mp4"), dir.path().join("out")),
            &ToolConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CliError::InputNotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_drop_ratio_rejected() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("v.mp4");
        std::fs::write(&video, b"not a video").unwrap();
        let mut args = args(video, dir.path().join("out"));
        args.drop = 1.5;

        let err = run(args, &ToolConfig::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_setup_fatal());
    }
}
