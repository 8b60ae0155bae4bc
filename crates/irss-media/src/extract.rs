//! Frame extraction: save decoded frames and tag them with telemetry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use irss_models::{frame_output_path, SpatialMapEntry};

use crate::error::MediaResult;
use crate::source::RawFrame;
use crate::telemetry::TelemetryTrack;

/// Writes frames as `<index>.<ext>` and builds their spatial map entries.
#[derive(Debug, Clone)]
pub struct FrameSaver {
    output_dir: PathBuf,
    extension: String,
    telemetry: Option<Arc<TelemetryTrack>>,
}

impl FrameSaver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            extension: "png".to_string(),
            telemetry: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryTrack>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Encode and write one frame. Blocking.
    pub fn save(&self, frame: &RawFrame) -> MediaResult<SpatialMapEntry> {
        let destination = frame_output_path(&self.output_dir, frame.index, &self.extension);
        frame.image.save(&destination)?;

        let telemetry = self
            .telemetry
            .as_ref()
            .and_then(|track| track.at(frame.timestamp))
            .cloned();

        Ok(SpatialMapEntry {
            frame: destination,
            index: frame.index,
            timestamp_ms: frame.timestamp.as_millis() as u64,
            telemetry,
        })
    }
}

/// Write the spatial mapping file, ordered by frame index.
pub async fn write_spatial_map(path: impl AsRef<Path>, entries: &[SpatialMapEntry]) -> MediaResult<()> {
    let mut sorted: Vec<&SpatialMapEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.index);
    let json = serde_json::to_vec_pretty(&sorted)?;
    tokio::fs::write(path.as_ref(), json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::parse_srt;
    use image::RgbImage;
    use std::time::Duration;
    use tempfile::TempDir;

    const SRT: &str = "1\n00:00:00,000 --> 00:00:01,000\nFrameCnt: 1, DiffTime: 1000ms\n[iso: 100] [shutter: 1/500.0] [fnum: 2.8] [latitude: 10.5] [longitude: 20.25] [rel_alt: 30.000 abs_alt: 400.000]\n";

    fn raw(index: u64, ms: u64) -> RawFrame {
        RawFrame {
            index,
            timestamp: Duration::from_millis(ms),
            image: RgbImage::new(4, 4),
        }
    }

    #[test]
    fn test_save_tags_covered_frames() {
        let dir = TempDir::new().unwrap();
        let track = Arc::new(TelemetryTrack::new(parse_srt(SRT)));
        let saver = FrameSaver::new(dir.path()).with_telemetry(track);

        let tagged = saver.save(&raw(5, 500)).unwrap();
        assert_eq!(tagged.frame, dir.path().join("5.png"));
        assert!(tagged.frame.exists());
        assert_eq!(tagged.timestamp_ms, 500);
        assert!((tagged.telemetry.unwrap().latitude - 10.5).abs() < 1e-9);

        let untagged = saver.save(&raw(90, 3_000)).unwrap();
        assert!(untagged.telemetry.is_none());
    }

    #[tokio::test]
    async fn test_spatial_map_sorted() {
        let dir = TempDir::new().unwrap();
        let saver = FrameSaver::new(dir.path()).with_extension(".bmp");
        let entries = vec![saver.save(&raw(2, 80)).unwrap(), saver.save(&raw(0, 0)).unwrap()];
        assert!(dir.path().join("2.bmp").exists());

        let map_path = dir.path().join("spatial.json");
        write_spatial_map(&map_path, &entries).await.unwrap();

        let parsed: Vec<SpatialMapEntry> =
            serde_json::from_slice(&std::fs::read(&map_path).unwrap()).unwrap();
        assert_eq!(parsed.iter().map(|e| e.index).collect::<Vec<_>>(), vec![0, 2]);
    }
}
