/*!
 * Post-migration verification
 *
 * Re-validates the provisioned directory structure, then walks every
 * source object under the migration prefix and confirms the target copy
 * byte for byte: size compared first (cheap, fails fast on gross
 * mismatch), then a full SHA-256 of both sides. Each object produces an
 * append-only VerificationRecord; failures are routed to the recovery
 * controller as VERIFICATION errors, and a structurally inconsistent
 * target escalates to FATAL.
 */

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::CategorySpec;
use crate::error::{ErrorKind, ExodusError, Result};
use crate::events::{Event, EventSink, JsonlWriter, Phase};
use crate::provision::DirectoryProvisioner;
use crate::recovery::RecoveryController;
use crate::store::{is_dir_marker, ObjectStore};

/// Verification outcome for one object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Verified,
    Failed,
}

/// Append-only audit record for one verified object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub source_key: String,
    pub target_key: String,
    pub checksum: String,
    pub status: VerifyStatus,
    pub detail: String,
    pub timestamp: String,
}

/// Run-level verification summary
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifySummary {
    pub total: u64,
    pub verified: u64,
    pub failed: u64,
    pub structure_warnings: Vec<String>,
}

/// SHA-256 of a byte slice, hex-encoded
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verifies migrated objects and the provisioned layout
pub struct Verifier {
    source: Arc<dyn ObjectStore>,
    target: Arc<dyn ObjectStore>,
    categories: Vec<CategorySpec>,
    audit_path: PathBuf,
    sink: EventSink,
}

impl Verifier {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        target: Arc<dyn ObjectStore>,
        categories: Vec<CategorySpec>,
        audit_path: impl Into<PathBuf>,
        sink: EventSink,
    ) -> Self {
        Self {
            source,
            target,
            categories,
            audit_path: audit_path.into(),
            sink,
        }
    }

    /// Structure pass: every category must validate; content checks warn
    /// on files whose extension does not belong in the category
    pub fn verify_structure(&self, provisioner: &DirectoryProvisioner) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        let mut invalid = Vec::new();

        for category in &self.categories {
            if !provisioner.validate_structure(&category.name)? {
                invalid.push(category.name.clone());
                continue;
            }
            warnings.extend(self.check_category_content(category)?);
        }

        if !invalid.is_empty() {
            // The target layout cannot be trusted; this escalates to
            // FATAL and rolls the run back
            return Err(ExodusError::StructureInvalid(format!(
                "categories failed validation: {}",
                invalid.join(", ")
            )));
        }
        Ok(warnings)
    }

    fn check_category_content(&self, category: &CategorySpec) -> Result<Vec<String>> {
        if category.allowed_extensions.is_empty() {
            return Ok(Vec::new());
        }

        let mut warnings = Vec::new();
        let required: Vec<String> = category
            .required_files
            .iter()
            .map(|f| format!("{}/{}", category.name, f))
            .collect();

        for entry in self.target.list(&format!("{}/", category.name))? {
            if is_dir_marker(&entry.key) || required.contains(&entry.key) {
                continue;
            }
            let extension = entry.key.rsplit('.').next().unwrap_or("");
            if !category
                .allowed_extensions
                .iter()
                .any(|allowed| allowed == extension)
            {
                warnings.push(format!(
                    "{}: unexpected extension in category '{}'",
                    entry.key, category.name
                ));
            }
        }
        Ok(warnings)
    }

    /// Per-object pass over every source object under `prefix`
    pub fn verify_objects(
        &self,
        prefix: &str,
        recovery: &RecoveryController,
    ) -> Result<VerifySummary> {
        let audit = JsonlWriter::append_to(&self.audit_path)?;
        let mut summary = VerifySummary::default();
        let listing = self.source.list(prefix)?;
        let objects: Vec<_> = listing
            .into_iter()
            .filter(|e| !is_dir_marker(&e.key))
            .collect();
        let total = objects.len();

        for (index, entry) in objects.iter().enumerate() {
            summary.total += 1;
            match self.verify_one(&entry.key, &entry.key) {
                Ok(record) => {
                    summary.verified += 1;
                    audit.append(&record)?;
                }
                Err(e) => {
                    summary.failed += 1;
                    let record = VerificationRecord {
                        source_key: entry.key.clone(),
                        target_key: entry.key.clone(),
                        checksum: String::new(),
                        status: VerifyStatus::Failed,
                        detail: e.to_string(),
                        timestamp: Utc::now().to_rfc3339(),
                    };
                    audit.append(&record)?;
                    recovery.handle_error(&e.to_string(), ErrorKind::Verification, &entry.key);
                    recovery.queue_for_recovery(&entry.key, &entry.key, 3);
                }
            }
            self.sink.emit(Event::Progress {
                phase: Phase::Verify,
                percent: ((index + 1) as f64 / total.max(1) as f64) * 100.0,
            });
        }

        self.sink.emit(Event::VerificationSummary {
            total: summary.total,
            verified: summary.verified,
            failed: summary.failed,
        });
        tracing::info!(
            total = summary.total,
            verified = summary.verified,
            failed = summary.failed,
            "verification finished"
        );
        Ok(summary)
    }

    /// Size first, then full content hash on both sides
    fn verify_one(&self, source_key: &str, target_key: &str) -> Result<VerificationRecord> {
        let source_info = self.source.info(source_key)?;
        let target_info = self.target.info(target_key)?;

        if source_info.size != target_info.size {
            return Err(ExodusError::Verification(format!(
                "size mismatch for {}: source {} target {}",
                target_key, source_info.size, target_info.size
            )));
        }

        let source_sum = checksum(&self.source.get(source_key)?);
        let target_sum = checksum(&self.target.get(target_key)?);
        if source_sum != target_sum {
            return Err(ExodusError::ChecksumMismatch {
                key: target_key.to_string(),
                expected: source_sum,
                actual: target_sum,
            });
        }

        Ok(VerificationRecord {
            source_key: source_key.to_string(),
            target_key: target_key.to_string(),
            checksum: target_sum,
            status: VerifyStatus::Verified,
            detail: String::new(),
            timestamp: Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::read_jsonl;
    use crate::kv::KvStore;
    use crate::recovery::RetryPolicy;
    use crate::store::LocalStore;
    use tempfile::tempdir;

    struct Fixture {
        _dirs: Vec<tempfile::TempDir>,
        source: Arc<dyn ObjectStore>,
        target: Arc<dyn ObjectStore>,
        verifier: Verifier,
        recovery: RecoveryController,
        audit_path: PathBuf,
    }

    fn fixture(categories: Vec<CategorySpec>) -> Fixture {
        let source_dir = tempdir().unwrap();
        let target_dir = tempdir().unwrap();
        let state_dir = tempdir().unwrap();

        let source: Arc<dyn ObjectStore> =
            Arc::new(LocalStore::new(source_dir.path(), "source").unwrap());
        let target: Arc<dyn ObjectStore> =
            Arc::new(LocalStore::new(target_dir.path(), "target").unwrap());
        let audit_path = state_dir.path().join("verification.jsonl");

        let verifier = Verifier::new(
            source.clone(),
            target.clone(),
            categories,
            &audit_path,
            EventSink::disabled(),
        );
        let recovery = RecoveryController::new(
            Arc::new(KvStore::open(state_dir.path().join("kv")).unwrap()),
            &state_dir.path().join("errors.jsonl"),
            RetryPolicy::chunks(3, 0),
            EventSink::disabled(),
        )
        .unwrap();

        Fixture {
            _dirs: vec![source_dir, target_dir, state_dir],
            source,
            target,
            verifier,
            recovery,
            audit_path,
        }
    }

    #[test]
    fn test_matching_objects_verify() {
        let f = fixture(vec![]);
        f.source.put("a.bin", b"same").unwrap();
        f.target.put("a.bin", b"same").unwrap();

        let summary = f.verifier.verify_objects("", &f.recovery).unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.verified, 1);
        assert_eq!(summary.failed, 0);

        let records: Vec<VerificationRecord> = read_jsonl(&f.audit_path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, VerifyStatus::Verified);
        assert_eq!(records[0].checksum, checksum(b"same"));
    }

    #[test]
    fn test_size_mismatch_fails_fast() {
        let f = fixture(vec![]);
        f.source.put("a.bin", b"longer-content").unwrap();
        f.target.put("a.bin", b"short").unwrap();

        let summary = f.verifier.verify_objects("", &f.recovery).unwrap();
        assert_eq!(summary.failed, 1);
        // Routed into the recovery queue, not fatal
        assert_eq!(f.recovery.pending().unwrap().len(), 1);

        let records: Vec<VerificationRecord> = read_jsonl(&f.audit_path).unwrap();
        assert!(records[0].detail.contains("size mismatch"));
    }

    #[test]
    fn test_content_mismatch_detected() {
        let f = fixture(vec![]);
        // Same size, different bytes
        f.source.put("a.bin", b"AAAA").unwrap();
        f.target.put("a.bin", b"BBBB").unwrap();

        let summary = f.verifier.verify_objects("", &f.recovery).unwrap();
        assert_eq!(summary.failed, 1);

        let records: Vec<VerificationRecord> = read_jsonl(&f.audit_path).unwrap();
        assert_eq!(records[0].status, VerifyStatus::Failed);
        assert!(records[0].detail.contains("Checksum mismatch"));
    }

    #[test]
    fn test_missing_target_fails() {
        let f = fixture(vec![]);
        f.source.put("a.bin", b"data").unwrap();

        let summary = f.verifier.verify_objects("", &f.recovery).unwrap();
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_markers_are_skipped() {
        let f = fixture(vec![]);
        f.source.put("media/.keep", b"").unwrap();
        f.source.put("media/a.bin", b"x").unwrap();
        f.target.put("media/a.bin", b"x").unwrap();

        let summary = f.verifier.verify_objects("", &f.recovery).unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.verified, 1);
    }

    #[test]
    fn test_foreign_extension_warns() {
        let category = CategorySpec {
            name: "configs".to_string(),
            allowed_extensions: vec!["json".to_string(), "yaml".to_string()],
            required_files: vec!["README".to_string()],
            subdirectories: vec![],
        };
        let f = fixture(vec![category.clone()]);

        f.target.put("configs/.keep", b"").unwrap();
        f.target.put("configs/README", b"").unwrap();
        f.target.put("configs/app.json", b"{}").unwrap();
        f.target.put("configs/core.bin", b"\x00").unwrap();

        let warnings = f.verifier.check_category_content(&category).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("configs/core.bin"));
    }
}
