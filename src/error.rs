/*!
 * Error types for Exodus
 */

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, ExodusError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_INTEGRITY: i32 = 3;

#[derive(Debug)]
pub enum ExodusError {
    /// I/O error
    Io(io::Error),

    /// Configuration error
    Config(String),

    /// Object store operation failed
    Store(StoreError),

    /// Insufficient space at the target
    InsufficientSpace { required: u64, available: u64 },

    /// Credential validation or permission probe failed
    Credentials(String),

    /// Pre-migration backup could not be taken
    BackupFailed(String),

    /// System resources above configured ceilings
    ResourceBusy(String),

    /// Category lock could not be acquired within the wait ceiling
    LockTimeout { category: String },

    /// Directory provisioning failed
    Provision(String),

    /// Journal read/write/replay error
    Journal(String),

    /// Per-object transfer failure
    Transfer { key: String, message: String },

    /// Retries exhausted for an operation
    RetriesExhausted { attempts: u32 },

    /// Checksum verification failed
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// Post-transfer verification failure for one object
    Verification(String),

    /// Target layout failed aggregate structure validation; the target
    /// cannot be trusted and the run must roll back
    StructureInvalid(String),

    /// Chunk metadata persistence error
    Metadata(String),

    /// Compare-and-swap conflict in the state store
    CasConflict { key: String },

    /// Serialization error
    Serialization(String),

    /// Run cancelled by signal
    Cancelled,

    /// Rollback failed (forensic log has details)
    Rollback(String),

    /// Generic error with message
    Other(String),
}

/// Error taxonomy used for classification, counters, and recovery dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorKind {
    /// Unrecoverable; triggers rollback and termination
    Fatal,
    /// Transient network failure; retried with backoff
    Network,
    /// Resource exhaustion; cleanup-and-recheck, then escalate
    Space,
    /// Auth/permission failure; re-validate, then escalate
    Credentials,
    /// Per-object transfer failure; queued for bounded retry
    Transfer,
    /// Post-hoc mismatch; queued for re-transfer
    Verification,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::Fatal,
        ErrorKind::Network,
        ErrorKind::Space,
        ErrorKind::Credentials,
        ErrorKind::Transfer,
        ErrorKind::Verification,
    ];
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Fatal => write!(f, "FATAL"),
            ErrorKind::Network => write!(f, "NETWORK"),
            ErrorKind::Space => write!(f, "SPACE"),
            ErrorKind::Credentials => write!(f, "CREDENTIALS"),
            ErrorKind::Transfer => write!(f, "TRANSFER"),
            ErrorKind::Verification => write!(f, "VERIFICATION"),
        }
    }
}

impl ExodusError {
    /// Classify this error into the recovery taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExodusError::Io(_) => ErrorKind::Network,
            ExodusError::Config(_) => ErrorKind::Fatal,
            ExodusError::Store(e) => match e {
                StoreError::Unavailable(_) => ErrorKind::Network,
                StoreError::NotFound { .. } => ErrorKind::Transfer,
                StoreError::PermissionDenied(_) => ErrorKind::Credentials,
                StoreError::Invalid(_) => ErrorKind::Transfer,
            },
            ExodusError::InsufficientSpace { .. } => ErrorKind::Space,
            ExodusError::Credentials(_) => ErrorKind::Credentials,
            ExodusError::BackupFailed(_) => ErrorKind::Fatal,
            ExodusError::ResourceBusy(_) => ErrorKind::Space,
            ExodusError::LockTimeout { .. } => ErrorKind::Transfer,
            ExodusError::Provision(_) => ErrorKind::Fatal,
            ExodusError::Journal(_) => ErrorKind::Fatal,
            ExodusError::Transfer { .. } => ErrorKind::Transfer,
            ExodusError::RetriesExhausted { .. } => ErrorKind::Transfer,
            ExodusError::ChecksumMismatch { .. } => ErrorKind::Verification,
            ExodusError::Verification(_) => ErrorKind::Verification,
            ExodusError::StructureInvalid(_) => ErrorKind::Fatal,
            ExodusError::Metadata(_) => ErrorKind::Fatal,
            ExodusError::CasConflict { .. } => ErrorKind::Transfer,
            ExodusError::Serialization(_) => ErrorKind::Fatal,
            ExodusError::Cancelled => ErrorKind::Fatal,
            ExodusError::Rollback(_) => ErrorKind::Fatal,
            ExodusError::Other(_) => ErrorKind::Transfer,
        }
    }

    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ExodusError::ChecksumMismatch { .. } | ExodusError::Verification(_) => EXIT_INTEGRITY,
            e if e.is_fatal() => EXIT_FATAL,
            _ => EXIT_PARTIAL,
        }
    }
}

impl fmt::Display for ExodusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExodusError::Io(e) => write!(f, "I/O error: {}", e),
            ExodusError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ExodusError::Store(e) => write!(f, "Store error: {}", e),
            ExodusError::InsufficientSpace {
                required,
                available,
            } => write!(
                f,
                "Insufficient space: {} bytes required, {} bytes available",
                required, available
            ),
            ExodusError::Credentials(msg) => write!(f, "Credential error: {}", msg),
            ExodusError::BackupFailed(msg) => write!(f, "Pre-migration backup failed: {}", msg),
            ExodusError::ResourceBusy(msg) => write!(f, "System resources busy: {}", msg),
            ExodusError::LockTimeout { category } => {
                write!(f, "Timed out acquiring lock for category '{}'", category)
            }
            ExodusError::Provision(msg) => write!(f, "Directory provisioning failed: {}", msg),
            ExodusError::Journal(msg) => write!(f, "Journal error: {}", msg),
            ExodusError::Transfer { key, message } => {
                write!(f, "Transfer of '{}' failed: {}", key, message)
            }
            ExodusError::RetriesExhausted { attempts } => {
                write!(f, "Retries exhausted after {} attempts", attempts)
            }
            ExodusError::ChecksumMismatch {
                key,
                expected,
                actual,
            } => write!(
                f,
                "Checksum mismatch for '{}': expected {}, got {}",
                key, expected, actual
            ),
            ExodusError::Verification(msg) => write!(f, "Verification failed: {}", msg),
            ExodusError::StructureInvalid(msg) => {
                write!(f, "Target structure validation failed: {}", msg)
            }
            ExodusError::Metadata(msg) => write!(f, "Chunk metadata error: {}", msg),
            ExodusError::CasConflict { key } => {
                write!(f, "Concurrent update conflict on state record '{}'", key)
            }
            ExodusError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ExodusError::Cancelled => write!(f, "Migration cancelled"),
            ExodusError::Rollback(msg) => write!(f, "Rollback error: {}", msg),
            ExodusError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ExodusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExodusError::Io(e) => Some(e),
            ExodusError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ExodusError {
    fn from(e: io::Error) -> Self {
        ExodusError::Io(e)
    }
}

impl From<StoreError> for ExodusError {
    fn from(e: StoreError) -> Self {
        ExodusError::Store(e)
    }
}

impl From<serde_json::Error> for ExodusError {
    fn from(e: serde_json::Error) -> Self {
        ExodusError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            ExodusError::InsufficientSpace {
                required: 10,
                available: 5
            }
            .kind(),
            ErrorKind::Space
        );
        assert_eq!(
            ExodusError::Credentials("expired".to_string()).kind(),
            ErrorKind::Credentials
        );
        assert_eq!(
            ExodusError::Store(StoreError::Unavailable("down".to_string())).kind(),
            ErrorKind::Network
        );
        assert_eq!(
            ExodusError::Store(StoreError::PermissionDenied("denied".to_string())).kind(),
            ErrorKind::Credentials
        );
        assert!(ExodusError::BackupFailed("disk".to_string()).is_fatal());
        assert!(ExodusError::StructureInvalid("no base dir".to_string()).is_fatal());
        assert!(!ExodusError::Transfer {
            key: "a".to_string(),
            message: "b".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            ExodusError::Config("bad".to_string()).exit_code(),
            EXIT_FATAL
        );
        assert_eq!(
            ExodusError::ChecksumMismatch {
                key: "k".to_string(),
                expected: "a".to_string(),
                actual: "b".to_string()
            }
            .exit_code(),
            EXIT_INTEGRITY
        );
        assert_eq!(
            ExodusError::RetriesExhausted { attempts: 3 }.exit_code(),
            EXIT_PARTIAL
        );
    }

    #[test]
    fn test_kind_serialization() {
        let s = serde_json::to_string(&ErrorKind::Network).unwrap();
        assert_eq!(s, "\"NETWORK\"");
        let k: ErrorKind = serde_json::from_str("\"VERIFICATION\"").unwrap();
        assert_eq!(k, ErrorKind::Verification);
    }

    #[test]
    fn test_display() {
        let e = ExodusError::LockTimeout {
            category: "configs".to_string(),
        };
        assert!(e.to_string().contains("configs"));
    }
}
