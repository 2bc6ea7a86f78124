/*!
 * Directory provisioning
 *
 * Creates and validates the policy-defined category layout in the target
 * store. Each category moves through `absent → locked → created →
 * validated → unlocked`, with rollback as the error exit: creation is
 * all-or-nothing per category. Every mutating operation is journaled, and
 * `recover_from_journal` replays the journal newest-first so an
 * interrupted run is idempotent on restart.
 */

pub mod journal;
pub mod lock;

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::CategorySpec;
use crate::error::{ExodusError, Result};
use crate::store::{ObjectStore, DIR_MARKER};

pub use journal::{Journal, JournalEntry, JournalOp};
pub use lock::{CategoryLockGuard, CategoryLocks};

/// Provisions and validates the category layout in the target store
pub struct DirectoryProvisioner {
    target: Arc<dyn ObjectStore>,
    categories: Vec<CategorySpec>,
    locks: CategoryLocks,
    journal: Journal,
    holder: String,
}

impl DirectoryProvisioner {
    pub fn new(
        target: Arc<dyn ObjectStore>,
        categories: Vec<CategorySpec>,
        journal: Journal,
        holder: impl Into<String>,
    ) -> Self {
        Self {
            target,
            categories,
            locks: CategoryLocks::new(),
            journal,
            holder: holder.into(),
        }
    }

    pub fn categories(&self) -> &[CategorySpec] {
        &self.categories
    }

    pub fn locks(&self) -> &CategoryLocks {
        &self.locks
    }

    fn spec(&self, category: &str) -> Result<&CategorySpec> {
        self.categories
            .iter()
            .find(|c| c.name == category)
            .ok_or_else(|| ExodusError::Provision(format!("unknown category '{}'", category)))
    }

    /// Marker keys that define a category's directory skeleton
    fn marker_keys(spec: &CategorySpec) -> Vec<String> {
        let mut keys = vec![format!("{}/{}", spec.name, DIR_MARKER)];
        for sub in &spec.subdirectories {
            keys.push(format!("{}/{}/{}", spec.name, sub, DIR_MARKER));
        }
        keys
    }

    /// Placeholder keys for the category's required files
    fn required_keys(spec: &CategorySpec) -> Vec<String> {
        spec.required_files
            .iter()
            .map(|f| format!("{}/{}", spec.name, f))
            .collect()
    }

    /// Everything creation writes for a category, in creation order
    fn all_keys(spec: &CategorySpec) -> Vec<String> {
        let mut keys = Self::marker_keys(spec);
        keys.extend(Self::required_keys(spec));
        keys
    }

    /// True when the prefix holds any object at all
    fn prefix_populated(&self, prefix: &str) -> Result<bool> {
        Ok(!self.target.list(prefix)?.is_empty())
    }

    /// Create a category's layout atomically under its lock.
    /// Already-valid layouts are left untouched and not re-journaled.
    pub fn create_directory(&self, category: &str) -> Result<()> {
        let spec = self.spec(category)?;
        let _guard = self.locks.acquire(category, &self.holder)?;

        if self.validate_structure(category)? {
            tracing::debug!(category, "layout already valid, skipping creation");
            return Ok(());
        }

        self.journal.record(
            JournalOp::Create,
            category,
            &format!(
                "{} subdirectories, {} required files",
                spec.subdirectories.len(),
                spec.required_files.len()
            ),
        )?;

        for key in Self::all_keys(spec) {
            if let Err(e) = self.target.put(&key, b"") {
                tracing::warn!(category, key, error = %e, "creation step failed, rolling back");
                self.rollback_creation(category)?;
                return Err(ExodusError::Provision(format!(
                    "creating {} failed: {}",
                    key, e
                )));
            }
        }

        tracing::info!(category, "category layout created");
        Ok(())
    }

    /// Delete everything creation wrote for a category and journal it
    pub fn rollback_creation(&self, category: &str) -> Result<()> {
        let spec = self.spec(category)?;
        for key in Self::all_keys(spec) {
            if let Err(e) = self.target.delete(&key) {
                tracing::warn!(category, key, error = %e, "rollback delete failed");
            }
        }
        self.journal
            .record(JournalOp::Rollback, category, "creation rolled back")
    }

    /// Read-only check: base, subdirectories, and required files all present
    pub fn validate_structure(&self, category: &str) -> Result<bool> {
        let spec = self.spec(category)?;

        let base_marker = format!("{}/{}", spec.name, DIR_MARKER);
        if !self.target.exists(&base_marker)? && !self.prefix_populated(&format!("{}/", spec.name))?
        {
            return Ok(false);
        }

        for sub in &spec.subdirectories {
            let marker = format!("{}/{}/{}", spec.name, sub, DIR_MARKER);
            let prefix = format!("{}/{}/", spec.name, sub);
            if !self.target.exists(&marker)? && !self.prefix_populated(&prefix)? {
                return Ok(false);
            }
        }

        for key in Self::required_keys(spec) {
            if !self.target.exists(&key)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Replay the journal newest-first and re-create any journaled
    /// category that no longer validates
    pub fn recover_from_journal(&self) -> Result<usize> {
        let mut handled: HashSet<String> = HashSet::new();
        let mut recovered = 0;

        for entry in self.journal.entries_newest_first()? {
            if !handled.insert(entry.category.clone()) {
                continue;
            }
            match entry.op {
                JournalOp::Create => {
                    if self.spec(&entry.category).is_err() {
                        tracing::warn!(
                            category = %entry.category,
                            "journal references unknown category, skipping"
                        );
                        continue;
                    }
                    if !self.validate_structure(&entry.category)? {
                        tracing::info!(category = %entry.category, "re-creating from journal");
                        self.create_directory(&entry.category)?;
                        recovered += 1;
                    }
                }
                // Rollback and cleanup entries are informational
                JournalOp::Rollback | JournalOp::Cleanup => {}
            }
        }

        Ok(recovered)
    }

    /// Remove transient markers whose directories now hold real objects
    pub fn cleanup_markers(&self, category: &str) -> Result<usize> {
        let spec = self.spec(category)?;
        let _guard = self.locks.acquire(category, &self.holder)?;

        let mut removed = 0;
        for marker in Self::marker_keys(spec) {
            let prefix = marker
                .strip_suffix(DIR_MARKER)
                .expect("marker keys end with the marker suffix")
                .to_string();
            let others = self
                .target
                .list(&prefix)?
                .into_iter()
                .filter(|e| e.key != marker)
                .count();
            if others > 0 && self.target.exists(&marker)? {
                self.target.delete(&marker)?;
                removed += 1;
            }
        }

        if removed > 0 {
            self.journal.record(
                JournalOp::Cleanup,
                category,
                &format!("{} markers removed", removed),
            )?;
        }
        Ok(removed)
    }
}
