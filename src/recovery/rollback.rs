/*!
 * Crash-safe rollback
 *
 * Restores the target store to the preflight backup snapshot: every key
 * not present in the snapshot (final objects, part objects, provisioned
 * markers) is deleted. Rollback is best-effort; every action and every
 * failure is appended to a forensic rollback log.
 */

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::JsonlWriter;
use crate::preflight::backup::BackupSnapshot;
use crate::store::ObjectStore;
use crate::transfer::CancelToken;

/// One rollback action, for forensic review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackAction {
    pub action: String,
    pub key: String,
    pub detail: String,
    pub timestamp: String,
}

/// Outcome of a rollback pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    /// Keys created during the run and deleted by rollback
    pub deleted: usize,
    /// Snapshot keys still present and untouched
    pub kept: usize,
    /// Snapshot keys that disappeared during the run (not restorable
    /// from a listing snapshot; logged for forensics)
    pub missing: usize,
    /// Deletes that failed
    pub failures: usize,
}

fn log_action(log: &JsonlWriter, action: &str, key: &str, detail: &str) {
    let record = RollbackAction {
        action: action.to_string(),
        key: key.to_string(),
        detail: detail.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    };
    if let Err(e) = log.append(&record) {
        tracing::warn!("rollback log append failed: {}", e);
    }
}

/// Roll the target back to the preflight snapshot.
///
/// Signals cancellation first so in-flight workers stop admitting work;
/// the caller is expected to have joined its worker pool before invoking
/// this (process_transfer_queue returns once its workers are reaped).
pub fn initiate_rollback(
    target: &Arc<dyn ObjectStore>,
    snapshot: &BackupSnapshot,
    cancel: &CancelToken,
    log_path: &Path,
) -> Result<RollbackReport> {
    cancel.cancel();
    let log = JsonlWriter::append_to(log_path)?;
    log_action(
        &log,
        "begin",
        "",
        &format!("restoring to snapshot taken {}", snapshot.taken_at),
    );

    let mut report = RollbackReport::default();

    let listing = target.list("")?;
    for entry in &listing {
        if snapshot.contains(&entry.key) {
            report.kept += 1;
            continue;
        }
        match target.delete(&entry.key) {
            Ok(()) => {
                report.deleted += 1;
                log_action(&log, "delete", &entry.key, "created during failed run");
            }
            Err(e) => {
                report.failures += 1;
                log_action(&log, "delete_failed", &entry.key, &e.to_string());
                tracing::warn!(key = %entry.key, error = %e, "rollback delete failed");
            }
        }
    }

    // Snapshot keys that vanished mid-run are not restorable from a
    // listing-only snapshot; record them for the operator
    for key in snapshot.keys() {
        if !listing.iter().any(|e| e.key == key) {
            report.missing += 1;
            log_action(&log, "missing", key, "present in snapshot, absent after run");
        }
    }

    log_action(
        &log,
        "finish",
        "",
        &format!(
            "{} deleted, {} kept, {} missing, {} failures",
            report.deleted, report.kept, report.missing, report.failures
        ),
    );
    tracing::info!(
        deleted = report.deleted,
        kept = report.kept,
        missing = report.missing,
        failures = report.failures,
        "rollback finished"
    );
    Ok(report)
}
