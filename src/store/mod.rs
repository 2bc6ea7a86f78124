/*!
 * Object store abstraction layer
 *
 * All pipeline components talk to source and target buckets through the
 * `ObjectStore` trait: list/get/put/delete/info/copy against a named
 * bucket root. Implementations:
 * - Local directory-backed store (always available; used by tests)
 * - Native S3 client (feature `s3-native`)
 */

pub mod local;
#[cfg(feature = "s3-native")]
pub mod s3;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use local::LocalStore;
#[cfg(feature = "s3-native")]
pub use s3::S3Store;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Store unreachable or failing (network-class)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Object not found
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Access denied by the store
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed key or invalid request
    #[error("Invalid request: {0}")]
    Invalid(String),
}

/// One entry in a bucket listing
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Metadata for a single object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub size: u64,
    pub etag: Option<String>,
}

/// Unified interface to an S3-compatible bucket
pub trait ObjectStore: Send + Sync {
    /// List objects under a key prefix, sorted by key
    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectEntry>>;

    /// Fetch an entire object
    fn get(&self, key: &str) -> StoreResult<Vec<u8>>;

    /// Fetch `len` bytes of an object starting at `offset`
    fn get_range(&self, key: &str, offset: u64, len: u64) -> StoreResult<Vec<u8>>;

    /// Write an object, replacing any existing content
    fn put(&self, key: &str, data: &[u8]) -> StoreResult<()>;

    /// Delete an object; deleting a missing key is not an error
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Get size and etag for an object
    fn info(&self, key: &str) -> StoreResult<ObjectInfo>;

    /// Server-side copy within the bucket
    fn copy(&self, src_key: &str, dst_key: &str) -> StoreResult<()>;

    /// Check for object existence without fetching content
    fn exists(&self, key: &str) -> StoreResult<bool> {
        match self.info(key) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Store name for logging
    fn name(&self) -> &str;
}

/// Marker suffix for keys that model directories in a flat keyspace
pub const DIR_MARKER: &str = ".keep";

/// True for keys that only exist to model a directory
pub fn is_dir_marker(key: &str) -> bool {
    key == DIR_MARKER || key.ends_with("/.keep") || key.ends_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_marker_detection() {
        assert!(is_dir_marker("media/.keep"));
        assert!(is_dir_marker("media/raw/"));
        assert!(!is_dir_marker("media/a.bin"));
        assert!(!is_dir_marker("media/keepsake.bin"));
    }

    #[test]
    fn test_store_error_display() {
        let e = StoreError::NotFound {
            key: "a/b.bin".to_string(),
        };
        assert_eq!(e.to_string(), "Object not found: a/b.bin");
    }
}
