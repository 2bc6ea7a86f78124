/*!
 * Central error handling and recovery
 *
 * Every component routes failures through `handle_error`, which counts
 * the error by kind, appends it to the error log, and answers with a
 * disposition: abort (fatal), retry with backoff (network), continue
 * (self-healed space/credentials), or queued for bounded retry
 * (transfer/verification). The recovery queue lives in the keyed record
 * store; entries that exhaust the retry limit are moved aside and logged,
 * never silently dropped.
 */

pub mod retry;
pub mod rollback;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result};
use crate::events::{Event, EventSink, JsonlWriter};
use crate::kv::{Expected, KvStore};

pub use retry::{BackoffStrategy, RetryPolicy};
pub use rollback::{initiate_rollback, RollbackReport};

/// Record-store namespaces for the recovery queue
pub const RECOVERY_NAMESPACE: &str = "recovery";
pub const ABANDONED_NAMESPACE: &str = "abandoned";

/// One classified error, appended to the process-wide error log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub source: String,
    pub timestamp: String,
}

/// A failed operation awaiting bounded retry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryEntry {
    pub source_key: String,
    pub target_key: String,
    pub priority: u8,
    pub timestamp: String,
    pub retry_count: u32,
}

/// What the caller should do after reporting an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Unrecoverable: run rollback, then terminate
    Abort,
    /// Transient: retry the operation after the backoff
    Retry { backoff: Duration },
    /// Recovered in place: carry on
    Continue,
    /// Queued on the recovery queue for bounded retry
    Queued,
}

/// Outcome of draining the recovery queue
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoverySummary {
    pub recovered: usize,
    pub abandoned: usize,
}

type RecheckHook = Box<dyn Fn() -> bool + Send + Sync>;

/// Central error classifier and recovery queue
pub struct RecoveryController {
    kv: Arc<KvStore>,
    error_log: JsonlWriter,
    counters: Mutex<HashMap<ErrorKind, u64>>,
    sink: EventSink,
    policy: RetryPolicy,
    /// Attempts temp cleanup and re-checks space; true means recovered
    space_recheck: Option<RecheckHook>,
    /// Re-validates credentials; true means recovered
    credential_recheck: Option<RecheckHook>,
}

impl RecoveryController {
    pub fn new(
        kv: Arc<KvStore>,
        error_log_path: &Path,
        policy: RetryPolicy,
        sink: EventSink,
    ) -> Result<Self> {
        Ok(Self {
            kv,
            error_log: JsonlWriter::append_to(error_log_path)?,
            counters: Mutex::new(HashMap::new()),
            sink,
            policy,
            space_recheck: None,
            credential_recheck: None,
        })
    }

    pub fn with_space_recheck(mut self, hook: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.space_recheck = Some(Box::new(hook));
        self
    }

    pub fn with_credential_recheck(
        mut self,
        hook: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.credential_recheck = Some(Box::new(hook));
        self
    }

    /// Record a classified error and decide what happens next
    pub fn handle_error(&self, message: &str, kind: ErrorKind, source: &str) -> Disposition {
        *self.counters.lock().unwrap().entry(kind).or_insert(0) += 1;

        let record = ErrorRecord {
            kind,
            message: message.to_string(),
            source: source.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.error_log.append(&record) {
            tracing::warn!("error log append failed: {}", e);
        }
        self.sink.emit(Event::ErrorRecorded {
            kind,
            source: source.to_string(),
            message: message.to_string(),
        });
        tracing::error!(%kind, source, "{}", message);

        match kind {
            ErrorKind::Fatal => Disposition::Abort,
            ErrorKind::Network => Disposition::Retry {
                backoff: self.policy.delay,
            },
            ErrorKind::Space => match &self.space_recheck {
                Some(hook) if hook() => {
                    tracing::info!("space recovered after cleanup");
                    Disposition::Continue
                }
                _ => {
                    tracing::error!("space could not be recovered, escalating");
                    Disposition::Abort
                }
            },
            ErrorKind::Credentials => match &self.credential_recheck {
                Some(hook) if hook() => {
                    tracing::info!("credentials re-validated");
                    Disposition::Continue
                }
                _ => {
                    tracing::error!("credential re-validation failed, escalating");
                    Disposition::Abort
                }
            },
            ErrorKind::Transfer | ErrorKind::Verification => Disposition::Queued,
        }
    }

    /// Queue a failed operation for later bounded retry
    pub fn queue_for_recovery(&self, source_key: &str, target_key: &str, priority: u8) {
        let entry = RecoveryEntry {
            source_key: source_key.to_string(),
            target_key: target_key.to_string(),
            priority,
            timestamp: Utc::now().to_rfc3339(),
            retry_count: 0,
        };
        // Re-queueing an already-queued key keeps the existing entry and
        // its retry count
        match self
            .kv
            .put(RECOVERY_NAMESPACE, target_key, &entry, Expected::Absent)
        {
            Ok(_) => tracing::info!(source_key, "queued for recovery"),
            Err(crate::error::ExodusError::CasConflict { .. }) => {}
            Err(e) => tracing::warn!("recovery queue append failed: {}", e),
        }
    }

    /// Entries currently awaiting retry
    pub fn pending(&self) -> Result<Vec<RecoveryEntry>> {
        let mut entries = Vec::new();
        for key in self.kv.keys(RECOVERY_NAMESPACE)? {
            if let Some((entry, _)) = self.kv.get::<RecoveryEntry>(RECOVERY_NAMESPACE, &key)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Entries abandoned after exhausting the retry limit
    pub fn abandoned(&self) -> Result<Vec<RecoveryEntry>> {
        let mut entries = Vec::new();
        for key in self.kv.keys(ABANDONED_NAMESPACE)? {
            if let Some((entry, _)) = self.kv.get::<RecoveryEntry>(ABANDONED_NAMESPACE, &key)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Drain the recovery queue, retrying each entry up to the policy's
    /// attempt ceiling. Exhausted entries move to the abandoned namespace
    /// and are logged as permanently failed.
    pub fn recover_failed_operations<F>(&self, mut retry_operation: F) -> Result<RecoverySummary>
    where
        F: FnMut(&RecoveryEntry) -> Result<()>,
    {
        let mut summary = RecoverySummary::default();

        loop {
            let mut pending = Vec::new();
            for key in self.kv.keys(RECOVERY_NAMESPACE)? {
                if let Some((entry, version)) =
                    self.kv.get::<RecoveryEntry>(RECOVERY_NAMESPACE, &key)?
                {
                    pending.push((key, entry, version));
                }
            }
            if pending.is_empty() {
                break;
            }

            // Every failed attempt bumps retry_count, so each pass makes
            // progress toward the attempt ceiling and the loop terminates
            for (key, mut entry, version) in pending {
                match retry_operation(&entry) {
                    Ok(()) => {
                        self.kv.delete(RECOVERY_NAMESPACE, &key)?;
                        summary.recovered += 1;
                        tracing::info!(source = %entry.source_key, "recovery retry succeeded");
                    }
                    Err(e) => {
                        entry.retry_count += 1;
                        if entry.retry_count >= self.policy.max_attempts {
                            self.kv.delete(RECOVERY_NAMESPACE, &key)?;
                            self.kv.put(ABANDONED_NAMESPACE, &key, &entry, Expected::Any)?;
                            summary.abandoned += 1;
                            self.handle_error(
                                &format!(
                                    "permanently failed after {} retries: {}",
                                    entry.retry_count, e
                                ),
                                ErrorKind::Transfer,
                                &entry.source_key,
                            );
                        } else {
                            self.kv.put(
                                RECOVERY_NAMESPACE,
                                &key,
                                &entry,
                                Expected::Version(version),
                            )?;
                            std::thread::sleep(self.policy.delay_for(entry.retry_count));
                        }
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Error counts by kind, aggregated by the caller into the run report
    pub fn counters(&self) -> HashMap<ErrorKind, u64> {
        self.counters.lock().unwrap().clone()
    }

    pub fn total_errors(&self) -> u64 {
        self.counters.lock().unwrap().values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn controller(dir: &Path) -> RecoveryController {
        let kv = Arc::new(KvStore::open(dir.join("kv")).unwrap());
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
            ..Default::default()
        };
        RecoveryController::new(kv, &dir.join("errors.jsonl"), policy, EventSink::disabled())
            .unwrap()
    }

    #[test]
    fn test_dispositions_by_kind() {
        let dir = tempdir().unwrap();
        let ctl = controller(dir.path());

        assert_eq!(
            ctl.handle_error("boom", ErrorKind::Fatal, "pipeline"),
            Disposition::Abort
        );
        assert!(matches!(
            ctl.handle_error("flaky", ErrorKind::Network, "a.bin"),
            Disposition::Retry { .. }
        ));
        assert_eq!(
            ctl.handle_error("bad chunk", ErrorKind::Transfer, "a.bin"),
            Disposition::Queued
        );
        // No recheck hooks: space and credentials escalate
        assert_eq!(
            ctl.handle_error("disk full", ErrorKind::Space, "target"),
            Disposition::Abort
        );
        assert_eq!(
            ctl.handle_error("expired", ErrorKind::Credentials, "target"),
            Disposition::Abort
        );
    }

    #[test]
    fn test_space_recheck_recovers() {
        let dir = tempdir().unwrap();
        let ctl = controller(dir.path()).with_space_recheck(|| true);
        assert_eq!(
            ctl.handle_error("disk full", ErrorKind::Space, "target"),
            Disposition::Continue
        );
    }

    #[test]
    fn test_counters_aggregate() {
        let dir = tempdir().unwrap();
        let ctl = controller(dir.path());

        ctl.handle_error("x", ErrorKind::Network, "a");
        ctl.handle_error("y", ErrorKind::Network, "b");
        ctl.handle_error("z", ErrorKind::Transfer, "c");

        let counters = ctl.counters();
        assert_eq!(counters.get(&ErrorKind::Network), Some(&2));
        assert_eq!(counters.get(&ErrorKind::Transfer), Some(&1));
        assert_eq!(ctl.total_errors(), 3);
    }

    #[test]
    fn test_recovery_queue_drains_on_success() {
        let dir = tempdir().unwrap();
        let ctl = controller(dir.path());

        ctl.queue_for_recovery("a.bin", "t/a.bin", 3);
        ctl.queue_for_recovery("b.bin", "t/b.bin", 3);
        assert_eq!(ctl.pending().unwrap().len(), 2);

        let summary = ctl.recover_failed_operations(|_| Ok(())).unwrap();
        assert_eq!(summary.recovered, 2);
        assert_eq!(summary.abandoned, 0);
        assert!(ctl.pending().unwrap().is_empty());
    }

    #[test]
    fn test_exhausted_entries_are_abandoned_not_dropped() {
        let dir = tempdir().unwrap();
        let ctl = controller(dir.path());

        ctl.queue_for_recovery("bad.bin", "t/bad.bin", 3);
        let attempts = AtomicU32::new(0);
        let summary = ctl
            .recover_failed_operations(|_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(crate::error::ExodusError::Other("still broken".to_string()))
            })
            .unwrap();

        assert_eq!(summary.abandoned, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(ctl.pending().unwrap().is_empty());
        // Left for manual intervention
        let abandoned = ctl.abandoned().unwrap();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].retry_count, 3);
    }

    #[test]
    fn test_requeue_preserves_existing_entry() {
        let dir = tempdir().unwrap();
        let ctl = controller(dir.path());

        ctl.queue_for_recovery("a.bin", "t/a.bin", 3);
        ctl.queue_for_recovery("a.bin", "t/a.bin", 3);
        assert_eq!(ctl.pending().unwrap().len(), 1);
    }
}
