//! DJI flight-log subtitles (SRT) parsing and timestamp lookup.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use irss_models::TelemetryRecord;

use crate::error::MediaResult;

fn timecode_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<sh>\d{2}):(?P<sm>\d{2}):(?P<ss>\d{2})[,.](?P<sms>\d{3})\s*-->\s*(?P<eh>\d{2}):(?P<em>\d{2}):(?P<es>\d{2})[,.](?P<ems>\d{3})",
        )
        .expect("timecode regex is valid")
    })
}

fn fields_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)FrameCnt: (?P<frame>\d+), DiffTime: (?P<diff>\d+)ms.*?\[iso: (?P<iso>\d+)\] \[shutter: (?P<shutter>[\d./]+)\] \[fnum: (?P<fnum>[\d.]+)\].*?\[latitude: (?P<lat>[\d.-]+)\] \[longitude: (?P<lon>[\d.-]+)\].*?\[rel_alt: (?P<rel_alt>[\d.-]+) abs_alt: (?P<abs_alt>[\d.-]+)\]",
        )
        .expect("telemetry regex is valid")
    })
}

/// Parse the contents of a DJI `.SRT` file.
///
/// Blocks that do not carry a timecode and the full field set, or whose
/// numbers do not parse, are skipped.
pub fn parse_srt(content: &str) -> Vec<TelemetryRecord> {
    let normalized = content.replace("\r\n", "\n");
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for block in normalized.split("\n\n").filter(|b| !b.trim().is_empty()) {
        match parse_block(block) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(skipped, parsed = records.len(), "Skipped malformed SRT blocks");
    }
    records.sort_by_key(|r| r.start_ms);
    records
}

fn parse_block(block: &str) -> Option<TelemetryRecord> {
    let tc = timecode_regex().captures(block)?;
    let start_ms = timecode_ms(&tc["sh"], &tc["sm"], &tc["ss"], &tc["sms"])?;
    let end_ms = timecode_ms(&tc["eh"], &tc["em"], &tc["es"], &tc["ems"])?;

    let f = fields_regex().captures(block)?;
    Some(TelemetryRecord {
        start_ms,
        end_ms,
        frame_count: f["frame"].parse().ok()?,
        diff_time_ms: f["diff"].parse().ok()?,
        iso: f["iso"].parse().ok()?,
        shutter: f["shutter"].to_string(),
        fnum: f["fnum"].parse().ok()?,
        latitude: f["lat"].parse().ok()?,
        longitude: f["lon"].parse().ok()?,
        relative_altitude: f["rel_alt"].parse().ok()?,
        absolute_altitude: f["abs_alt"].parse().ok()?,
    })
}

fn timecode_ms(h: &str, m: &str, s: &str, ms: &str) -> Option<u64> {
    let h: u64 = h.parse().ok()?;
    let m: u64 = m.parse().ok()?;
    let s: u64 = s.parse().ok()?;
    let ms: u64 = ms.parse().ok()?;
    Some(((h * 60 + m) * 60 + s) * 1_000 + ms)
}

/// Telemetry records ordered by start time.
#[derive(Debug, Clone, Default)]
pub struct TelemetryTrack {
    records: Vec<TelemetryRecord>,
}

impl TelemetryTrack {
    pub fn new(mut records: Vec<TelemetryRecord>) -> Self {
        records.sort_by_key(|r| r.start_ms);
        Self { records }
    }

    /// Read and parse an SRT file.
    pub async fn load(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let records = parse_srt(&content);
        debug!(path = %path.display(), records = records.len(), "Loaded telemetry");
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record whose interval covers `timestamp`, if any.
    pub fn at(&self, timestamp: Duration) -> Option<&TelemetryRecord> {
        let ts = timestamp.as_millis() as u64;
        let idx = self.records.partition_point(|r| r.start_ms <= ts);
        idx.checked_sub(1)
            .map(|i| &self.records[i])
            .filter(|r| r.covers(ts))
    }
}
