/*!
 * Preflight checks
 *
 * Four checks run in fixed order, short-circuiting on the first failure:
 * space, credentials, target backup, resource availability. Nothing
 * mutates the target before all four pass; the backup taken here is the
 * rollback pre-image for the whole run.
 */

pub mod backup;
pub mod credentials;
pub mod resources;
pub mod space;

use std::path::{Path, PathBuf};

use crate::config::PreflightConfig;
use crate::error::{ExodusError, Result};
use crate::events::{Event, EventSink, Phase};
use crate::store::ObjectStore;

use resources::{sample_resources, ResourceHistory, ResourceSample, UsageForecast};

/// Outcome of one preflight check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Warned,
}

/// One line of the preflight report
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

/// Result of a completed preflight run
#[derive(Debug)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
    /// Snapshot file the rollback path restores from
    pub backup_path: PathBuf,
    /// Space the run is expected to need at the target
    pub required_bytes: u64,
    /// Quietest historical hour, when history exists
    pub suggested_hour: Option<u32>,
}

/// Runs the fixed preflight sequence against source and target stores
pub struct PreflightChecker<'a> {
    source: &'a dyn ObjectStore,
    target: &'a dyn ObjectStore,
    config: &'a PreflightConfig,
    backups_dir: PathBuf,
    history: ResourceHistory,
    /// Local mount backing the target, when one exists
    target_mount: Option<PathBuf>,
    sink: EventSink,
}

impl<'a> PreflightChecker<'a> {
    pub fn new(
        source: &'a dyn ObjectStore,
        target: &'a dyn ObjectStore,
        config: &'a PreflightConfig,
        backups_dir: impl Into<PathBuf>,
        history_path: &Path,
        sink: EventSink,
    ) -> Self {
        Self {
            source,
            target,
            config,
            backups_dir: backups_dir.into(),
            history: ResourceHistory::new(history_path),
            target_mount: None,
            sink,
        }
    }

    /// Measure free space on this local mount instead of requiring a
    /// configured target capacity
    pub fn with_target_mount(mut self, mount: impl Into<PathBuf>) -> Self {
        self.target_mount = Some(mount.into());
        self
    }

    /// Run all checks in order, short-circuiting on the first failure
    pub fn run(&self) -> Result<PreflightReport> {
        let mut checks = Vec::new();

        let required_bytes = self.check_space(&mut checks)?;
        self.progress(25.0);

        self.check_credentials(&mut checks)?;
        self.progress(50.0);

        let backup_path = self.check_backup(&mut checks)?;
        self.progress(75.0);

        let suggested_hour = self.check_resources(&mut checks)?;
        self.progress(100.0);

        tracing::info!(checks = checks.len(), "preflight passed");
        Ok(PreflightReport {
            checks,
            backup_path,
            required_bytes,
            suggested_hour,
        })
    }

    fn progress(&self, percent: f64) {
        self.sink.emit(Event::Progress {
            phase: Phase::Preflight,
            percent,
        });
    }

    fn check_space(&self, checks: &mut Vec<CheckResult>) -> Result<u64> {
        let source_total: u64 = self
            .source
            .list("")
            .map_err(ExodusError::from)?
            .iter()
            .map(|e| e.size)
            .sum();
        let target_used: u64 = self
            .target
            .list("")
            .map_err(ExodusError::from)?
            .iter()
            .map(|e| e.size)
            .sum();

        let available =
            space::available_bytes(self.target_mount.as_deref(), target_used, self.config)?;
        let required = space::verify_space(source_total, available, self.config)?;

        checks.push(CheckResult {
            name: "space",
            status: CheckStatus::Passed,
            detail: format!("{} bytes required, {} available", required, available),
        });
        Ok(required)
    }

    fn check_credentials(&self, checks: &mut Vec<CheckResult>) -> Result<()> {
        credentials::validate_credentials(self.target, self.config)?;
        checks.push(CheckResult {
            name: "credentials",
            status: CheckStatus::Passed,
            detail: "expiry window and list/read/write/delete probes ok".to_string(),
        });
        Ok(())
    }

    fn check_backup(&self, checks: &mut Vec<CheckResult>) -> Result<PathBuf> {
        // Prune first so a failed prune never outranks a fresh backup
        let pruned = backup::prune_backups(&self.backups_dir, self.config.backup_retention_days)
            .unwrap_or_else(|e| {
                tracing::warn!("backup pruning failed: {}", e);
                0
            });

        let path = backup::take_backup(self.target, &self.backups_dir)?;
        checks.push(CheckResult {
            name: "backup",
            status: CheckStatus::Passed,
            detail: format!("snapshot {} ({} pruned)", path.display(), pruned),
        });
        Ok(path)
    }

    fn check_resources(&self, checks: &mut Vec<CheckResult>) -> Result<Option<u32>> {
        let sample = sample_resources();
        let forecast = self
            .history
            .forecast(self.config.confidence_threshold)
            .unwrap_or(None);

        self.reject_if_busy(&sample)?;

        let (status, detail) = match &forecast {
            Some(forecast) if self.forecast_exceeds_ceilings(forecast) => (
                CheckStatus::Warned,
                format!(
                    "current usage ok, but predicted peaks (cpu {:.0}%, mem {:.0}%, io {:.0}%) \
                     exceed ceilings; suggested hour {:?}",
                    forecast.cpu.bound(),
                    forecast.memory.bound(),
                    forecast.io.bound(),
                    forecast.suggested_hour,
                ),
            ),
            _ => (
                CheckStatus::Passed,
                format!(
                    "cpu {:.0}%, mem {:.0}%, io {:.0}%",
                    sample.cpu_percent, sample.memory_percent, sample.io_percent
                ),
            ),
        };

        if let Err(e) = self.history.record(&sample) {
            tracing::warn!("resource history append failed: {}", e);
        }
        self.sink.emit(Event::ResourceSample(sample));

        checks.push(CheckResult {
            name: "resources",
            status,
            detail,
        });
        Ok(forecast.and_then(|f| f.suggested_hour))
    }

    fn reject_if_busy(&self, sample: &ResourceSample) -> Result<()> {
        if sample.cpu_percent > self.config.cpu_ceiling {
            return Err(ExodusError::ResourceBusy(format!(
                "cpu at {:.0}% exceeds ceiling {:.0}%",
                sample.cpu_percent, self.config.cpu_ceiling
            )));
        }
        if sample.memory_percent > self.config.memory_ceiling {
            return Err(ExodusError::ResourceBusy(format!(
                "memory at {:.0}% exceeds ceiling {:.0}%",
                sample.memory_percent, self.config.memory_ceiling
            )));
        }
        if sample.io_percent > self.config.io_ceiling {
            return Err(ExodusError::ResourceBusy(format!(
                "io at {:.0}% exceeds ceiling {:.0}%",
                sample.io_percent, self.config.io_ceiling
            )));
        }
        Ok(())
    }

    fn forecast_exceeds_ceilings(&self, forecast: &UsageForecast) -> bool {
        forecast.cpu.bound() > self.config.cpu_ceiling
            || forecast.memory.bound() > self.config.memory_ceiling
            || forecast.io.bound() > self.config.io_ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use tempfile::tempdir;

    struct Fixture {
        _dirs: Vec<tempfile::TempDir>,
        source: LocalStore,
        target: LocalStore,
        backups: PathBuf,
        history: PathBuf,
        mount: PathBuf,
    }

    fn fixture() -> Fixture {
        let source_dir = tempdir().unwrap();
        let target_dir = tempdir().unwrap();
        let state_dir = tempdir().unwrap();
        let source = LocalStore::new(source_dir.path(), "source").unwrap();
        let target = LocalStore::new(target_dir.path(), "target").unwrap();
        let backups = state_dir.path().join("backups");
        let history = state_dir.path().join("history.jsonl");
        let mount = target_dir.path().to_path_buf();
        Fixture {
            _dirs: vec![source_dir, target_dir, state_dir],
            source,
            target,
            backups,
            history,
            mount,
        }
    }

    fn lenient_config() -> PreflightConfig {
        let mut config = PreflightConfig::default();
        // Small figures so tempdir free space always suffices
        config.space_buffer_bytes = 1024;
        config.temp_allowance_bytes = 1024;
        // Never reject the host the tests run on
        config.cpu_ceiling = 100.0;
        config.memory_ceiling = 100.0;
        config.io_ceiling = 100.0;
        config
    }

    #[test]
    fn test_full_preflight_passes() {
        let f = fixture();
        f.source.put("media/a.bin", b"abc").unwrap();
        f.target.put("existing.bin", b"x").unwrap();

        let config = lenient_config();
        let checker = PreflightChecker::new(
            &f.source,
            &f.target,
            &config,
            &f.backups,
            &f.history,
            EventSink::disabled(),
        )
        .with_target_mount(&f.mount);

        let report = checker.run().unwrap();
        assert_eq!(report.checks.len(), 4);
        assert!(report.backup_path.exists());
        assert!(report.required_bytes >= 3);

        // Backup captured the pre-migration target state
        let snapshot = backup::load_backup(&report.backup_path).unwrap();
        assert!(snapshot.contains("existing.bin"));
    }

    #[test]
    fn test_space_failure_halts_before_backup() {
        let f = fixture();
        f.source.put("big.bin", b"data").unwrap();

        let mut config = lenient_config();
        // Remote-capacity path with an impossible requirement
        config.space_buffer_bytes = u64::MAX / 2;
        config.target_capacity_bytes = Some(1024);

        let checker = PreflightChecker::new(
            &f.source,
            &f.target,
            &config,
            &f.backups,
            &f.history,
            EventSink::disabled(),
        );

        let result = checker.run();
        assert!(matches!(
            result,
            Err(ExodusError::InsufficientSpace { .. })
        ));
        // Short-circuit: no backup was taken
        assert_eq!(backup::latest_backup(&f.backups).unwrap(), None);
    }

    #[test]
    fn test_busy_system_rejected() {
        let f = fixture();
        let mut config = lenient_config();
        // Negative ceilings reject any live sample
        config.cpu_ceiling = -1.0;
        config.memory_ceiling = -1.0;
        config.io_ceiling = -1.0;

        let checker = PreflightChecker::new(
            &f.source,
            &f.target,
            &config,
            &f.backups,
            &f.history,
            EventSink::disabled(),
        )
        .with_target_mount(&f.mount);

        let result = checker.run();
        assert!(matches!(result, Err(ExodusError::ResourceBusy(_))));
    }
}
