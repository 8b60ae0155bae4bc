//! End-of-run reporting: log lines plus optional JSON files.

use std::path::Path;

use irss_models::RunSummary;

use crate::error::CliResult;
use crate::logging::RunLogger;

/// Failed items listed individually in the log before truncating.
const MAX_LOGGED_FAILURES: usize = 20;

/// Log the outcome of a run.
pub fn log_summary(logger: &RunLogger, summary: &RunSummary) {
    if summary.cancelled {
        logger.log_warning(&format!(
            "cancelled after {} of the input items were admitted",
            summary.emitted
        ));
    }

    for failure in summary.failures.iter().take(MAX_LOGGED_FAILURES) {
        logger.log_warning(&format!(
            "{} failed at {}: {}",
            failure.id,
            failure.stage.as_str(),
            failure.reason
        ));
    }
    if summary.failures.len() > MAX_LOGGED_FAILURES {
        logger.log_warning(&format!(
            "{} more failures not shown",
            summary.failures.len() - MAX_LOGGED_FAILURES
        ));
    }

    if !summary.is_accounted() {
        logger.log_error(&format!(
            "accounting mismatch: {} emitted, {} succeeded, {} failed",
            summary.emitted,
            summary.succeeded,
            summary.failed()
        ));
    }

    let mut message = format!(
        "{} succeeded, {} failed in {:.1}s",
        summary.succeeded,
        summary.failed(),
        summary.elapsed_ms as f64 / 1000.0
    );
    if let Some(peak) = summary.peak_concurrency {
        message.push_str(&format!(", peak concurrency {}", peak));
    }
    logger.log_completion(&message);
}

/// Write the full summary as pretty JSON.
pub async fn write_summary(path: &Path, summary: &RunSummary) -> CliResult<()> {
    write_json(path, &serde_json::to_vec_pretty(summary)?).await
}

/// Write only the failed items, for retry tooling.
pub async fn write_failures(path: &Path, summary: &RunSummary) -> CliResult<()> {
    write_json(path, &serde_json::to_vec_pretty(&summary.failures)?).await
}

async fn write_json(path: &Path, bytes: &[u8]) -> CliResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Log the summary and write whichever report files were requested.
pub async fn finish(
    logger: &RunLogger,
    summary: &RunSummary,
    summary_out: Option<&Path>,
    failures_out: Option<&Path>,
) -> CliResult<()> {
    log_summary(logger, summary);

    if let Some(path) = summary_out {
        write_summary(path, summary).await?;
        logger.log_progress(&format!("summary written to {}", path.display()));
    }
    if let Some(path) = failures_out {
        write_failures(path, summary).await?;
        logger.log_progress(&format!(
            "{} failures written to {}",
            summary.failures.len(),
            path.display()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use irss_models::{FailureStage, ItemFailure, ItemId, RunId};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn summary_with_failure() -> RunSummary {
        let mut summary = RunSummary::new(RunId::from_string("run-1"), "mask-sky");
        summary.emitted = 3;
        summary.succeeded = 2;
        summary.completed = vec![ItemId::from(PathBuf::from("a.png")), ItemId::from(PathBuf::from("b.png"))];
        summary.failures = vec![ItemFailure::new(
            ItemId::from(PathBuf::from("c.png")),
            FailureStage::Load,
            "truncated",
        )];
        summary
    }

    #[tokio::test]
    async fn test_reports_written() {
        let dir = TempDir::new().unwrap();
        let summary = summary_with_failure();
        let logger = RunLogger::new(&summary.run_id, "mask-sky");
        let summary_path = dir.path().join("reports/summary.json");
        let failures_path = dir.path().join("failures.json");

        finish(&logger, &summary, Some(&summary_path), Some(&failures_path))
            .await
            .unwrap();

        let parsed: RunSummary =
            serde_json::from_slice(&std::fs::read(&summary_path).unwrap()).unwrap();
        assert_eq!(parsed.succeeded, 2);
        assert_eq!(parsed.failed(), 1);

        let failures: Vec<ItemFailure> =
            serde_json::from_slice(&std::fs::read(&failures_path).unwrap()).unwrap();
        assert_eq!(failures, summary.failures);
    }

    #[tokio::test]
    async fn test_no_files_without_paths() {
        let summary = summary_with_failure();
        let logger = RunLogger::new(&summary.run_id, "mask-sky");
        finish(&logger, &summary, None, None).await.unwrap();
    }
}
