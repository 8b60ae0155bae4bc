//! Frame sources.
//!
//! A frame source yields decoded frames in order. It is finite and forward
//! only; a run consumes it once.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_stream, StreamInfo};

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Position in the decoded stream, before any dropping
    pub index: u64,
    /// Presentation time relative to the stream start
    pub timestamp: Duration,
    pub image: RgbImage,
}

#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, `None` once exhausted.
    ///
    /// An `Err` ends the stream; callers should not poll again after it.
    async fn next_frame(&mut self) -> Option<MediaResult<RawFrame>>;

    /// Expected number of frames, when known.
    fn size_hint(&self) -> Option<u64> {
        None
    }
}

/// Frame source over an in-memory iterator.
pub struct IterFrameSource<I> {
    iter: I,
    hint: Option<u64>,
}

impl<I> IterFrameSource<I>
where
    I: Iterator<Item = MediaResult<RawFrame>> + Send,
{
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter(),
            hint: None,
        }
    }

    pub fn with_size_hint(mut self, frames: u64) -> Self {
        self.hint = Some(frames);
        self
    }
}

#[async_trait]
impl<I> FrameSource for IterFrameSource<I>
where
    I: Iterator<Item = MediaResult<RawFrame>> + Send,
{
    async fn next_frame(&mut self) -> Option<MediaResult<RawFrame>> {
        self.iter.next()
    }

    fn size_hint(&self) -> Option<u64> {
        self.hint
    }
}

/// Number of decoded frames per kept frame for a drop ratio in `(0, 1]`.
///
/// A ratio of `0.25` keeps every fourth frame.
pub fn keep_every(drop_ratio: f64) -> MediaResult<u64> {
    if !(drop_ratio > 0.0 && drop_ratio <= 1.0) {
        return Err(MediaError::invalid_config(format!(
            "drop ratio {} outside (0, 1]",
            drop_ratio
        )));
    }
    Ok(((1.0 / drop_ratio).round() as u64).max(1))
}

/// Decodes a video with an `ffmpeg` child process streaming raw RGB24.
pub struct FfmpegFrameSource {
    path: PathBuf,
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    info: StreamInfo,
    keep_every: u64,
    decoded: u64,
    finished: bool,
}

impl FfmpegFrameSource {
    /// Probe `path` and start decoding, keeping every `keep_every`-th frame.
    pub async fn open(path: impl AsRef<Path>, keep_every: u64) -> MediaResult<Self> {
        let path = path.as_ref();
        let info = probe_stream(path).await?;

        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg stdout not captured"))?;
        let stderr = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            })
        });

        info!(
            video = %path.display(),
            width = info.width,
            height = info.height,
            fps = info.fps,
            keep_every,
            "Decoding video"
        );

        Ok(Self {
            path: path.to_path_buf(),
            child,
            stdout: BufReader::with_capacity(info.rgb_frame_len().max(8 * 1024), stdout),
            stderr,
            info,
            keep_every: keep_every.max(1),
            decoded: 0,
            finished: false,
        })
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Reap the child once stdout is exhausted.
    async fn finish(&mut self) -> Option<MediaResult<RawFrame>> {
        self.finished = true;
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(e) => return Some(Err(e.into())),
        };
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.ok(),
            None => None,
        };

        debug!(video = %self.path.display(), decoded = self.decoded, %status, "Decoder exited");

        if status.success() {
            None
        } else {
            Some(Err(MediaError::ffmpeg_failed(
                format!("decoding {} failed", self.path.display()),
                stderr,
                status.code(),
            )))
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn next_frame(&mut self) -> Option<MediaResult<RawFrame>> {
        let frame_len = self.info.rgb_frame_len();

        loop {
            if self.finished {
                return None;
            }

            let mut buf = vec![0u8; frame_len];
            match self.stdout.read_exact(&mut buf).await {
                Ok(_) => {}
                // A trailing partial frame is discarded.
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return self.finish().await,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            }

            let index = self.decoded;
            self.decoded += 1;
            if index % self.keep_every != 0 {
                continue;
            }

            let timestamp = Duration::from_secs_f64(index as f64 / self.info.fps);
            return Some(
                RgbImage::from_raw(self.info.width, self.info.height, buf)
                    .map(|image| RawFrame {
                        index,
                        timestamp,
                        image,
                    })
                    .ok_or_else(|| MediaError::internal("raw frame size mismatch")),
            );
        }
    }

    fn size_hint(&self) -> Option<u64> {
        self.info
            .estimated_frames()
            .map(|n| (n + self.keep_every - 1) / self.keep_every)
    }
}
