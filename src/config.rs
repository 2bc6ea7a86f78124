/*!
 * Configuration types for Exodus
 *
 * A migration run is driven by one JSON document, loaded at process start,
 * validated, and treated as read-only for the life of the run.
 */

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ExodusError, Result};

/// Transfer engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Upper worker-pool bound when the system is idle
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Lower worker-pool bound under heavy system load
    #[serde(default = "default_min_threads")]
    pub min_threads: usize,

    /// Base chunk size in bytes; scaled per object size and history
    #[serde(default = "default_chunk_size_base")]
    pub chunk_size_base: u64,

    /// Maximum bandwidth in bytes per second (0 = unlimited)
    #[serde(default)]
    pub max_bandwidth: u64,

    /// Minimum expected bandwidth, used for stall reporting
    #[serde(default)]
    pub min_bandwidth: u64,

    /// Retry ceiling for failed chunks and recovery-queue entries
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Objects admitted to the queue per discovery batch
    #[serde(default = "default_queue_batch_size")]
    pub queue_batch_size: usize,

    /// Consult historical metrics when sizing chunks
    #[serde(default = "default_true")]
    pub predictive_chunking: bool,

    /// Reuse listing/info results within one run
    #[serde(default)]
    pub smart_caching: bool,

    /// Transfer only changed blocks when the target object already exists
    #[serde(default)]
    pub delta_transfers: bool,

    /// Block size for delta comparison in bytes
    #[serde(default = "default_delta_block_size")]
    pub delta_block_size: u64,
}

fn default_max_threads() -> usize {
    8
}
fn default_min_threads() -> usize {
    2
}
fn default_chunk_size_base() -> u64 {
    10 * 1024 * 1024
}
fn default_retry_limit() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    5
}
fn default_queue_batch_size() -> usize {
    100
}
fn default_delta_block_size() -> u64 {
    4 * 1024 * 1024
}
fn default_true() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            min_threads: default_min_threads(),
            chunk_size_base: default_chunk_size_base(),
            max_bandwidth: 0,
            min_bandwidth: 0,
            retry_limit: default_retry_limit(),
            retry_delay_secs: default_retry_delay(),
            queue_batch_size: default_queue_batch_size(),
            predictive_chunking: true,
            smart_caching: false,
            delta_transfers: false,
            delta_block_size: default_delta_block_size(),
        }
    }
}

/// Preflight thresholds and policies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightConfig {
    /// Required space = source total × ratio + buffer + temp
    #[serde(default = "default_space_ratio")]
    pub space_ratio: f64,

    /// Fixed buffer added to the space requirement, bytes
    #[serde(default = "default_space_buffer")]
    pub space_buffer_bytes: u64,

    /// Allowance for temporary part objects, bytes
    #[serde(default = "default_temp_allowance")]
    pub temp_allowance_bytes: u64,

    /// Free capacity of the target when it is not a local mount.
    /// S3-compatible APIs expose no free-space call, so remote targets
    /// must state their capacity here.
    #[serde(default)]
    pub target_capacity_bytes: Option<u64>,

    /// Credentials must remain valid at least this long
    #[serde(default = "default_credential_validity")]
    pub credential_validity_hours: i64,

    /// Configured credential expiry (RFC 3339), if the deployment knows it
    #[serde(default)]
    pub credential_expiry: Option<String>,

    /// Reject when current CPU usage exceeds this percentage
    #[serde(default = "default_cpu_ceiling")]
    pub cpu_ceiling: f32,

    /// Reject when current memory usage exceeds this percentage
    #[serde(default = "default_memory_ceiling")]
    pub memory_ceiling: f32,

    /// Reject when current I/O utilization exceeds this percentage
    #[serde(default = "default_io_ceiling")]
    pub io_ceiling: f32,

    /// Stddev multiplier applied to historical peak usage
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,

    /// Backups older than this are pruned
    #[serde(default = "default_backup_retention")]
    pub backup_retention_days: i64,
}

fn default_space_ratio() -> f64 {
    1.2
}
fn default_space_buffer() -> u64 {
    1024 * 1024 * 1024
}
fn default_temp_allowance() -> u64 {
    512 * 1024 * 1024
}
fn default_credential_validity() -> i64 {
    24
}
fn default_cpu_ceiling() -> f32 {
    80.0
}
fn default_memory_ceiling() -> f32 {
    75.0
}
fn default_io_ceiling() -> f32 {
    70.0
}
fn default_confidence() -> f32 {
    2.0
}
fn default_backup_retention() -> i64 {
    7
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            space_ratio: default_space_ratio(),
            space_buffer_bytes: default_space_buffer(),
            temp_allowance_bytes: default_temp_allowance(),
            target_capacity_bytes: None,
            credential_validity_hours: default_credential_validity(),
            credential_expiry: None,
            cpu_ceiling: default_cpu_ceiling(),
            memory_ceiling: default_memory_ceiling(),
            io_ceiling: default_io_ceiling(),
            confidence_threshold: default_confidence(),
            backup_retention_days: default_backup_retention(),
        }
    }
}

/// Policy template for one provisioned category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySpec {
    /// Category name; becomes the top-level key prefix
    pub name: String,

    /// Extensions expected inside this category; others draw a warning
    #[serde(default)]
    pub allowed_extensions: Vec<String>,

    /// Placeholder files provisioning must create, relative to the category root
    #[serde(default)]
    pub required_files: Vec<String>,

    /// Subdirectory layout provisioning must create, relative to the category root
    #[serde(default)]
    pub subdirectories: Vec<String>,
}

/// Complete migration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Transfer engine tuning
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Preflight thresholds
    #[serde(default)]
    pub preflight: PreflightConfig,

    /// Category layout to provision and validate in the target
    #[serde(default)]
    pub categories: Vec<CategorySpec>,

    /// Only migrate source keys under this prefix
    #[serde(default)]
    pub source_prefix: String,

    /// Directory for run state: chunk metadata, journals, metrics, backups
    pub state_dir: PathBuf,

    /// Line-delimited JSON event log consumed by external reporting
    #[serde(default)]
    pub event_log: Option<PathBuf>,

    /// Diagnostic log file (JSON format); stdout when unset
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Verbose diagnostic logging
    #[serde(default)]
    pub verbose: bool,
}

impl MigrationConfig {
    /// Load and validate a configuration document
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ExodusError::Config(format!("cannot read config {:?}: {}", path, e))
        })?;
        let config: MigrationConfig = serde_json::from_str(&data)
            .map_err(|e| ExodusError::Config(format!("invalid config {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        let t = &self.transfer;
        if t.min_threads == 0 {
            return Err(ExodusError::Config("min_threads must be at least 1".to_string()));
        }
        if t.max_threads < t.min_threads {
            return Err(ExodusError::Config(format!(
                "max_threads ({}) must be >= min_threads ({})",
                t.max_threads, t.min_threads
            )));
        }
        if t.chunk_size_base == 0 {
            return Err(ExodusError::Config("chunk_size_base must be non-zero".to_string()));
        }
        if t.delta_transfers && t.delta_block_size == 0 {
            return Err(ExodusError::Config(
                "delta_block_size must be non-zero when delta_transfers is enabled".to_string(),
            ));
        }
        if self.preflight.space_ratio < 1.0 {
            return Err(ExodusError::Config(format!(
                "space_ratio ({}) must be >= 1.0",
                self.preflight.space_ratio
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for category in &self.categories {
            if category.name.is_empty() || category.name.contains('/') {
                return Err(ExodusError::Config(format!(
                    "invalid category name {:?}",
                    category.name
                )));
            }
            if !seen.insert(category.name.as_str()) {
                return Err(ExodusError::Config(format!(
                    "duplicate category {:?}",
                    category.name
                )));
            }
        }
        Ok(())
    }
}
