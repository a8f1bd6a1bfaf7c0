use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;

use crate::harvest::HarvestSummary;
use crate::persist::{AtomicFileWriter, PersistError};

pub const REPORT_FILENAME: &str = "harvest-report.json";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("cannot encode report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Writes `summary` as pretty JSON to `<dir>/harvest-report.json`, replacing
/// any previous report.
pub fn write_run_report(
    dir: &Path,
    summary: &HarvestSummary,
    started: DateTime<Utc>,
    finished: DateTime<Utc>,
) -> Result<PathBuf, ReportError> {
    let failures = summary
        .translation
        .failures
        .iter()
        .map(|failure| {
            json!({
                "item": failure.identity.to_string(),
                "stage": failure.stage,
                "tolerated": failure.tolerated,
                "message": failure.message,
            })
        })
        .collect::<Vec<_>>();

    let report = json!({
        "started_utc": started.to_rfc3339_opts(SecondsFormat::Secs, true),
        "finished_utc": finished.to_rfc3339_opts(SecondsFormat::Secs, true),
        "queries": summary.queries,
        "requests": summary.requests,
        "entries_stored": summary.entries_stored,
        "entries_deleted": summary.entries_deleted,
        "group_memberships": summary.group_memberships,
        "photos": {
            "fetched": summary.photos.fetched,
            "failed": summary.photos.failed,
        },
        "translation": {
            "succeeded": summary.translation.succeeded,
            "failed": summary.translation.failed,
            "skipped": summary.translation.skipped,
            "failures": failures,
        },
    });

    let writer = AtomicFileWriter::new(dir);
    let path = writer.write(REPORT_FILENAME, serde_json::to_string_pretty(&report)?)?;
    Ok(path)
}
