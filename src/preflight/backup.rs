/*!
 * Pre-migration target backup
 *
 * Snapshots the full target listing (keys, sizes, etags) to a timestamped
 * JSON document before any mutation. The snapshot is the rollback
 * pre-image: `initiate_rollback` restores the target to exactly this
 * listing. Snapshots older than the retention window are pruned.
 */

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExodusError, Result};
use crate::store::ObjectStore;

/// One object in the pre-migration target state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub size: u64,
    #[serde(default)]
    pub etag: Option<String>,
}

/// Pre-migration image of the target bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub taken_at: String,
    pub target: String,
    pub entries: Vec<SnapshotEntry>,
}

impl BackupSnapshot {
    /// Keys present when the snapshot was taken
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }
}

fn snapshot_path(backups_dir: &Path, taken_at: DateTime<Utc>) -> PathBuf {
    backups_dir.join(format!(
        "backup-{}.json",
        taken_at.format("%Y%m%dT%H%M%S%.3f")
    ))
}

/// Snapshot the current target listing to the backup directory
pub fn take_backup(target: &dyn ObjectStore, backups_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(backups_dir)
        .map_err(|e| ExodusError::BackupFailed(format!("backup dir: {}", e)))?;

    let listing = target
        .list("")
        .map_err(|e| ExodusError::BackupFailed(format!("target listing: {}", e)))?;

    let mut entries = Vec::with_capacity(listing.len());
    for object in listing {
        let etag = match target.info(&object.key) {
            Ok(info) => info.etag,
            Err(e) => {
                return Err(ExodusError::BackupFailed(format!(
                    "info for {}: {}",
                    object.key, e
                )))
            }
        };
        entries.push(SnapshotEntry {
            key: object.key,
            size: object.size,
            etag,
        });
    }

    let taken_at = Utc::now();
    let snapshot = BackupSnapshot {
        taken_at: taken_at.to_rfc3339(),
        target: target.name().to_string(),
        entries,
    };

    let path = snapshot_path(backups_dir, taken_at);
    let data = serde_json::to_vec_pretty(&snapshot)?;
    std::fs::write(&path, data)
        .map_err(|e| ExodusError::BackupFailed(format!("write {:?}: {}", path, e)))?;

    tracing::info!(
        snapshot = %path.display(),
        objects = snapshot.entries.len(),
        "target backup taken"
    );
    Ok(path)
}

/// Load a snapshot file
pub fn load_backup(path: &Path) -> Result<BackupSnapshot> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Most recent snapshot in the backup directory, if any
pub fn latest_backup(backups_dir: &Path) -> Result<Option<PathBuf>> {
    if !backups_dir.exists() {
        return Ok(None);
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(backups_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("backup-") && n.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths.pop())
}

/// Delete snapshots older than the retention window; returns pruned count
pub fn prune_backups(backups_dir: &Path, retention_days: i64) -> Result<usize> {
    if !backups_dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - Duration::days(retention_days);
    let mut pruned = 0;

    for entry in std::fs::read_dir(backups_dir)? {
        let path = entry?.path();
        let Ok(snapshot) = load_backup(&path) else {
            continue;
        };
        let Ok(taken_at) = DateTime::parse_from_rfc3339(&snapshot.taken_at) else {
            continue;
        };
        if taken_at.with_timezone(&Utc) < cutoff {
            std::fs::remove_file(&path)?;
            pruned += 1;
        }
    }

    if pruned > 0 {
        tracing::info!(pruned, "old backups pruned");
    }
    Ok(pruned)
}
