/*!
 * Provisioning journal
 *
 * Append-only JSON Lines log of every directory-provisioning operation.
 * Crash recovery replays entries newest-first: any `Create` whose category
 * no longer validates is re-created; `Rollback` and `Cleanup` entries are
 * informational. Replaying a journal against an already-valid layout is a
 * no-op, which makes interrupted provisioning runs idempotent on restart.
 */

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{ExodusError, Result};
use crate::events::{read_jsonl, JsonlWriter};

/// Journaled operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalOp {
    Create,
    Rollback,
    Cleanup,
}

/// One journal line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub op: JournalOp,
    pub category: String,
    pub detail: String,
    pub timestamp: String,
}

/// Append-only journal bound to one file
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry
    pub fn record(&self, op: JournalOp, category: &str, detail: &str) -> Result<()> {
        let entry = JournalEntry {
            op,
            category: category.to_string(),
            detail: detail.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        JsonlWriter::append_to(&self.path)
            .and_then(|writer| writer.append(&entry))
            .map_err(|e| ExodusError::Journal(format!("append: {}", e)))
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        read_jsonl(&self.path).map_err(|e| ExodusError::Journal(format!("read: {}", e)))
    }

    /// Entries newest-first, the order crash recovery replays them in
    pub fn entries_newest_first(&self) -> Result<Vec<JournalEntry>> {
        let mut entries = self.entries()?;
        entries.reverse();
        Ok(entries)
    }

    /// Count entries of one op kind for a category
    pub fn count(&self, op: JournalOp, category: &str) -> Result<usize> {
        Ok(self
            .entries()?
            .iter()
            .filter(|e| e.op == op && e.category == category)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_and_read_back() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path().join("journal.jsonl"));

        journal.record(JournalOp::Create, "media", "base layout").unwrap();
        journal.record(JournalOp::Cleanup, "media", "markers removed").unwrap();

        let entries = journal.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].op, JournalOp::Create);
        assert_eq!(entries[0].category, "media");
        assert_eq!(entries[1].op, JournalOp::Cleanup);
    }

    #[test]
    fn test_newest_first_ordering() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path().join("journal.jsonl"));

        journal.record(JournalOp::Create, "a", "").unwrap();
        journal.record(JournalOp::Create, "b", "").unwrap();
        journal.record(JournalOp::Rollback, "b", "").unwrap();

        let newest_first = journal.entries_newest_first().unwrap();
        assert_eq!(newest_first[0].op, JournalOp::Rollback);
        assert_eq!(newest_first[2].category, "a");
    }

    #[test]
    fn test_count_by_op_and_category() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path().join("journal.jsonl"));

        journal.record(JournalOp::Create, "media", "").unwrap();
        journal.record(JournalOp::Create, "configs", "").unwrap();
        journal.record(JournalOp::Create, "media", "recreated").unwrap();

        assert_eq!(journal.count(JournalOp::Create, "media").unwrap(), 2);
        assert_eq!(journal.count(JournalOp::Create, "configs").unwrap(), 1);
        assert_eq!(journal.count(JournalOp::Rollback, "media").unwrap(), 0);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path().join("none.jsonl"));
        assert!(journal.entries().unwrap().is_empty());
    }
}
