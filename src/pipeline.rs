/*!
 * Migration pipeline
 *
 * Wires the components into the composable entry points a caller invokes
 * in sequence: preflight → directory provisioning → transfer queue →
 * verification, with rollback as the exit path for anything fatal. All
 * shared state lives in this context object; nothing is process-global.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::MigrationConfig;
use crate::error::{ErrorKind, ExodusError, Result};
use crate::events::{Event, EventSink, Phase};
use crate::kv::KvStore;
use crate::preflight::backup::{latest_backup, load_backup};
use crate::preflight::resources::ResourceMonitor;
use crate::preflight::{PreflightChecker, PreflightReport};
use crate::provision::{DirectoryProvisioner, Journal};
use crate::recovery::{
    initiate_rollback, RecoveryController, RecoverySummary, RetryPolicy, RollbackReport,
};
use crate::store::ObjectStore;
use crate::transfer::{
    CancelToken, MetricsLog, TransferEngine, TransferReport, TransferTask, WorkQueue,
};
use crate::verify::{Verifier, VerifySummary};

/// Well-known locations under the state directory
#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn kv_root(&self) -> PathBuf {
        self.root.join("kv")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn journal(&self) -> PathBuf {
        self.root.join("provision-journal.jsonl")
    }

    pub fn metrics(&self) -> PathBuf {
        self.root.join("transfer-metrics.jsonl")
    }

    pub fn resource_history(&self) -> PathBuf {
        self.root.join("resource-history.jsonl")
    }

    pub fn error_log(&self) -> PathBuf {
        self.root.join("errors.jsonl")
    }

    pub fn verification_audit(&self) -> PathBuf {
        self.root.join("verification.jsonl")
    }

    pub fn rollback_log(&self) -> PathBuf {
        self.root.join("rollback.jsonl")
    }
}

/// Final accounting for a run
#[derive(Debug)]
pub struct RunReport {
    pub preflight: PreflightReport,
    pub transfer: TransferReport,
    pub verify: VerifySummary,
    pub recovery: RecoverySummary,
    pub errors_by_kind: std::collections::HashMap<ErrorKind, u64>,
}

/// The migration context: configuration, stores, and component wiring
pub struct MigrationPipeline {
    config: MigrationConfig,
    source: Arc<dyn ObjectStore>,
    target: Arc<dyn ObjectStore>,
    paths: StatePaths,
    sink: EventSink,
    cancel: CancelToken,
    engine: TransferEngine,
    provisioner: DirectoryProvisioner,
    recovery: RecoveryController,
    verifier: Verifier,
    /// Local mount backing the target store, when there is one
    target_mount: Option<PathBuf>,
}

impl MigrationPipeline {
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn ObjectStore>,
        target: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        config.validate()?;
        let paths = StatePaths::new(&config.state_dir);
        std::fs::create_dir_all(&config.state_dir)?;

        let sink = EventSink::new(config.event_log.as_deref())?;
        let kv = Arc::new(KvStore::open(paths.kv_root())?);
        let cancel = CancelToken::new();
        let metrics = Arc::new(MetricsLog::new(paths.metrics()));

        let engine = TransferEngine::new(
            source.clone(),
            target.clone(),
            config.transfer.clone(),
            kv.clone(),
            metrics,
            sink.clone(),
            cancel.clone(),
        );

        let provisioner = DirectoryProvisioner::new(
            target.clone(),
            config.categories.clone(),
            Journal::new(paths.journal()),
            "exodus",
        );

        let policy = RetryPolicy::chunks(
            config.transfer.retry_limit,
            config.transfer.retry_delay_secs,
        );
        let recovery =
            RecoveryController::new(kv.clone(), &paths.error_log(), policy, sink.clone())?;

        let verifier = Verifier::new(
            source.clone(),
            target.clone(),
            config.categories.clone(),
            paths.verification_audit(),
            sink.clone(),
        );

        Ok(Self {
            config,
            source,
            target,
            paths,
            sink,
            cancel,
            engine,
            provisioner,
            recovery,
            verifier,
            target_mount: None,
        })
    }

    /// Treat this local path as the mount backing the target store for
    /// the preflight space check
    pub fn with_target_mount(mut self, mount: impl Into<PathBuf>) -> Self {
        self.target_mount = Some(mount.into());
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn recovery(&self) -> &RecoveryController {
        &self.recovery
    }

    pub fn state_paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Entry point 1: the fixed preflight sequence
    pub fn run_preflight_checks(&self) -> Result<PreflightReport> {
        let mut checker = PreflightChecker::new(
            self.source.as_ref(),
            self.target.as_ref(),
            &self.config.preflight,
            self.paths.backups_dir(),
            &self.paths.resource_history(),
            self.sink.clone(),
        );
        if let Some(mount) = &self.target_mount {
            checker = checker.with_target_mount(mount);
        }
        checker.run()
    }

    /// Entry point 2: provision and validate the category layout.
    /// Replays the journal first so an interrupted previous run heals.
    pub fn setup_directory_structure(&self) -> Result<()> {
        self.provisioner.recover_from_journal()?;

        let total = self.provisioner.categories().len();
        for (index, category) in self.provisioner.categories().to_vec().iter().enumerate() {
            self.provisioner.create_directory(&category.name)?;
            if !self.provisioner.validate_structure(&category.name)? {
                return Err(ExodusError::Provision(format!(
                    "category '{}' failed validation after creation",
                    category.name
                )));
            }
            self.sink.emit(Event::Progress {
                phase: Phase::Provision,
                percent: ((index + 1) as f64 / total.max(1) as f64) * 100.0,
            });
        }
        Ok(())
    }

    /// Entry point 3: resume interrupted transfers, discover source
    /// objects, and drain the queue
    pub fn process_transfer_queue(&self) -> Result<TransferReport> {
        let (resumed, resume_failures) = self.engine.resume_transfers()?;
        if resumed + resume_failures > 0 {
            tracing::info!(resumed, resume_failures, "interrupted transfers resumed");
        }

        let mut queue = WorkQueue::new();
        self.engine.discover(&self.config.source_prefix, &mut queue)?;
        self.engine.process_queue(&mut queue, &self.recovery)
    }

    /// Entry point 4: structure and per-object verification, then a
    /// bounded retry pass over the recovery queue
    pub fn verify_migration(&self) -> Result<(VerifySummary, RecoverySummary)> {
        let warnings = self.verifier.verify_structure(&self.provisioner)?;
        for warning in &warnings {
            tracing::warn!("{}", warning);
        }

        let mut summary = self
            .verifier
            .verify_objects(&self.config.source_prefix, &self.recovery)?;
        summary.structure_warnings = warnings;

        let engine = &self.engine;
        let recovered = self.recovery.recover_failed_operations(|entry| {
            let task = TransferTask {
                source_key: entry.source_key.clone(),
                target_key: entry.target_key.clone(),
                priority: entry.priority,
                seq: 0,
                enqueued_at: chrono::Utc::now(),
            };
            engine.transfer_chunked(&task).map(|_| ())
        })?;

        Ok((summary, recovered))
    }

    /// Entry point 5: restore the target to the preflight snapshot
    pub fn initiate_rollback(&self) -> Result<RollbackReport> {
        let snapshot_path = latest_backup(&self.paths.backups_dir())?.ok_or_else(|| {
            ExodusError::Rollback("no backup snapshot to roll back to".to_string())
        })?;
        let snapshot = load_backup(&snapshot_path)?;

        self.sink.emit(Event::Progress {
            phase: Phase::Rollback,
            percent: 0.0,
        });
        let report = initiate_rollback(
            &self.target,
            &snapshot,
            &self.cancel,
            &self.paths.rollback_log(),
        )?;
        self.sink.emit(Event::Progress {
            phase: Phase::Rollback,
            percent: 100.0,
        });
        Ok(report)
    }

    /// Remove transient provisioning markers once verification holds
    pub fn cleanup(&self) -> Result<usize> {
        let mut removed = 0;
        for category in self.provisioner.categories().to_vec() {
            removed += self.provisioner.cleanup_markers(&category.name)?;
        }
        Ok(removed)
    }

    /// Full run: the four phases in order, rollback on anything fatal.
    /// A background resource monitor samples for the duration.
    pub fn run(&self) -> Result<RunReport> {
        let monitor = ResourceMonitor::start(
            &self.paths.resource_history(),
            Duration::from_secs(30),
            self.sink.clone(),
        );
        let result = self.run_phases();
        monitor.stop();

        match result {
            Ok(report) => Ok(report),
            Err(e) if e.is_fatal() || self.cancel.is_cancelled() => {
                tracing::error!("fatal failure, rolling back: {}", e);
                match self.initiate_rollback() {
                    Ok(report) => tracing::info!(
                        deleted = report.deleted,
                        "rollback complete after fatal error"
                    ),
                    Err(rollback_err) => {
                        tracing::error!("rollback itself failed: {}", rollback_err)
                    }
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn run_phases(&self) -> Result<RunReport> {
        let preflight = self.run_preflight_checks()?;
        self.setup_directory_structure()?;
        let transfer = self.process_transfer_queue()?;
        let (verify, recovery) = self.verify_migration()?;

        Ok(RunReport {
            preflight,
            transfer,
            verify,
            recovery,
            errors_by_kind: self.recovery.counters(),
        })
    }
}

/// Load the most recent backup snapshot path for external inspection
pub fn find_backup(state_dir: &Path) -> Result<Option<PathBuf>> {
    latest_backup(&StatePaths::new(state_dir).backups_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CategorySpec;
    use crate::store::LocalStore;
    use tempfile::tempdir;

    fn pipeline_fixture() -> (Vec<tempfile::TempDir>, MigrationPipeline, Arc<dyn ObjectStore>, Arc<dyn ObjectStore>)
    {
        let source_dir = tempdir().unwrap();
        let target_dir = tempdir().unwrap();
        let state_dir = tempdir().unwrap();

        let source: Arc<dyn ObjectStore> =
            Arc::new(LocalStore::new(source_dir.path(), "source").unwrap());
        let target: Arc<dyn ObjectStore> =
            Arc::new(LocalStore::new(target_dir.path(), "target").unwrap());

        let mut config: MigrationConfig = serde_json::from_str(&format!(
            r#"{{"state_dir": {:?}}}"#,
            state_dir.path().to_string_lossy()
        ))
        .unwrap();
        config.transfer.chunk_size_base = 8;
        config.transfer.retry_delay_secs = 0;
        config.preflight.space_buffer_bytes = 1024;
        config.preflight.temp_allowance_bytes = 1024;
        config.preflight.cpu_ceiling = 100.0;
        config.preflight.memory_ceiling = 100.0;
        config.preflight.io_ceiling = 100.0;
        config.categories = vec![CategorySpec {
            name: "media".to_string(),
            allowed_extensions: vec![],
            required_files: vec![],
            subdirectories: vec!["raw".to_string()],
        }];

        let mount = target_dir.path().to_path_buf();
        let pipeline = MigrationPipeline::new(config, source.clone(), target.clone())
            .unwrap()
            .with_target_mount(mount);

        (vec![source_dir, target_dir, state_dir], pipeline, source, target)
    }

    #[test]
    fn test_phases_in_sequence() {
        let (_dirs, pipeline, source, target) = pipeline_fixture();
        source.put("media/raw/a.bin", b"payload-a").unwrap();
        source.put("media/raw/b.bin", b"payload-b").unwrap();

        pipeline.run_preflight_checks().unwrap();
        pipeline.setup_directory_structure().unwrap();
        let transfer = pipeline.process_transfer_queue().unwrap();
        assert_eq!(transfer.transferred, 2);

        let (verify, recovery) = pipeline.verify_migration().unwrap();
        assert_eq!(verify.verified, 2);
        assert_eq!(verify.failed, 0);
        assert_eq!(recovery, RecoverySummary::default());

        assert_eq!(target.get("media/raw/a.bin").unwrap(), b"payload-a");
    }

    #[test]
    fn test_full_run_reports() {
        let (_dirs, pipeline, source, _target) = pipeline_fixture();
        source.put("media/raw/a.bin", b"payload").unwrap();

        let report = pipeline.run().unwrap();
        assert_eq!(report.transfer.transferred, 1);
        assert_eq!(report.verify.verified, 1);
        assert!(report.errors_by_kind.is_empty());
    }

    #[test]
    fn test_rollback_without_backup_fails() {
        let (_dirs, pipeline, _source, _target) = pipeline_fixture();
        let result = pipeline.initiate_rollback();
        assert!(matches!(result, Err(ExodusError::Rollback(_))));
    }

    #[test]
    fn test_provisioning_idempotent_through_pipeline() {
        let (_dirs, pipeline, _source, _target) = pipeline_fixture();
        pipeline.setup_directory_structure().unwrap();
        pipeline.setup_directory_structure().unwrap();

        let journal = Journal::new(pipeline.state_paths().journal());
        assert_eq!(
            journal
                .count(crate::provision::JournalOp::Create, "media")
                .unwrap(),
            1
        );
    }
}
