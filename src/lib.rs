/*!
 * Exodus - bucket-to-bucket storage migration engine
 *
 * A multi-phase pipeline that moves objects between two object-storage
 * buckets:
 * - Preflight checks: space, credentials, target backup, resource headroom
 * - Policy-driven directory provisioning with locking and a replay journal
 * - Chunked resumable parallel transfer with adaptive concurrency
 * - SHA-256 verification of every transferred object
 * - Central error classification with retry, recovery queue, and
 *   crash-safe rollback to the preflight snapshot
 */

pub mod config;
pub mod error;
pub mod events;
pub mod kv;
pub mod logging;
pub mod pipeline;
pub mod preflight;
pub mod provision;
pub mod recovery;
pub mod store;
pub mod transfer;
pub mod verify;

// Re-export commonly used types
pub use config::{CategorySpec, MigrationConfig, PreflightConfig, TransferConfig};
pub use error::{ErrorKind, ExodusError, Result};
pub use events::{Event, EventSink, Phase};
pub use pipeline::{MigrationPipeline, RunReport, StatePaths};
pub use store::{LocalStore, ObjectStore, StoreError};
pub use transfer::{CancelToken, TransferEngine, WorkQueue};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
