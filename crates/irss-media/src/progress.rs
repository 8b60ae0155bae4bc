//! Progress reporting for pipeline runs.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Receives per-item completion increments.
///
/// Called from the collector task; implementations must be cheap.
pub trait ProgressSink: Send + Sync {
    /// Expected number of items, when known up front.
    fn set_total(&self, total: u64);

    /// Items that reached a terminal outcome (saved or failed).
    fn increment(&self, n: u64);

    fn finish(&self);
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn set_total(&self, _total: u64) {}
    fn increment(&self, _n: u64) {}
    fn finish(&self) {}
}

/// Logs a progress line every `every` items.
#[derive(Debug)]
pub struct LogProgress {
    label: String,
    every: u64,
    total: AtomicU64,
    done: AtomicU64,
}

impl LogProgress {
    pub fn new(label: impl Into<String>, every: u64) -> Self {
        Self {
            label: label.into(),
            every: every.max(1),
            total: AtomicU64::new(0),
            done: AtomicU64::new(0),
        }
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Completion percentage, 0 when the total is unknown.
    pub fn percentage(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        ((self.done() as f64 / total as f64) * 100.0).min(100.0)
    }
}

impl ProgressSink for LogProgress {
    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn increment(&self, n: u64) {
        let before = self.done.fetch_add(n, Ordering::Relaxed);
        let after = before + n;
        if before / self.every != after / self.every {
            info!(
                label = %self.label,
                done = after,
                total = self.total.load(Ordering::Relaxed),
                percent = self.percentage(),
                "Progress"
            );
        }
    }

    fn finish(&self) {
        info!(label = %self.label, done = self.done(), "Finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        let progress = LogProgress::new("mask-sky", 10);
        assert_eq!(progress.percentage(), 0.0);
        progress.set_total(40);
        progress.increment(10);
        assert!((progress.percentage() - 25.0).abs() < 0.01);
        progress.increment(100);
        assert_eq!(progress.percentage(), 100.0);
        assert_eq!(progress.done(), 110);
    }
}
