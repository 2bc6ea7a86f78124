/*!
 * Embedded keyed record store
 *
 * Persists one JSON document per (namespace, key) with a version counter
 * and compare-and-swap updates. Chunk metadata and the recovery queue live
 * here; writers re-read and retry on a version conflict. Writes go through
 * a temp file in the same directory followed by an atomic rename, so a
 * crash never leaves a half-written record.
 */

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ExodusError, Result};

/// Version expected by a compare-and-swap write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// Record must not exist yet
    Absent,
    /// Record must be at exactly this version
    Version(u64),
    /// Unconditional write (single-writer records)
    Any,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: u64,
    value: T,
}

/// Directory-backed record store
pub struct KvStore {
    root: PathBuf,
}

impl KvStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn record_path(&self, namespace: &str, key: &str) -> PathBuf {
        // Keys may contain '/'; flatten so every record is a single file
        let flat = key.replace('/', "_");
        self.root.join(namespace).join(format!("{}.json", flat))
    }

    /// Read a record, returning the value and its current version
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<(T, u64)>> {
        let path = self.record_path(namespace, key);
        if !path.exists() {
            return Ok(None);
        }

        let data = std::fs::read_to_string(&path)?;
        let envelope: Envelope<T> = serde_json::from_str(&data)
            .map_err(|e| ExodusError::Metadata(format!("corrupt record {}: {}", key, e)))?;
        Ok(Some((envelope.value, envelope.version)))
    }

    /// Write a record if the stored version matches `expected`.
    /// Returns the new version.
    pub fn put<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        expected: Expected,
    ) -> Result<u64> {
        let path = self.record_path(namespace, key);
        let current = self.current_version(&path)?;

        let next = match (expected, current) {
            (Expected::Absent, None) => 1,
            (Expected::Absent, Some(_)) => {
                return Err(ExodusError::CasConflict {
                    key: key.to_string(),
                })
            }
            (Expected::Version(v), Some(current)) if v == current => current + 1,
            (Expected::Version(_), _) => {
                return Err(ExodusError::CasConflict {
                    key: key.to_string(),
                })
            }
            (Expected::Any, current) => current.unwrap_or(0) + 1,
        };

        let envelope = Envelope {
            version: next,
            value,
        };
        self.write_atomic(&path, &serde_json::to_vec_pretty(&envelope)?)?;
        Ok(next)
    }

    /// Delete a record; missing records are not an error
    pub fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let path = self.record_path(namespace, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List record keys in a namespace (flattened form)
    pub fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let dir = self.root.join(namespace);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".json") {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn current_version(&self, path: &Path) -> Result<Option<u64>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        let envelope: Envelope<serde_json::Value> = serde_json::from_str(&data)
            .map_err(|e| ExodusError::Metadata(format!("corrupt record {:?}: {}", path, e)))?;
        Ok(Some(envelope.version))
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| ExodusError::Metadata(format!("record path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(data)?;
        temp.flush()?;
        temp.persist(path)
            .map_err(|e| ExodusError::Metadata(format!("persist {:?}: {}", path, e)))?;
        Ok(())
    }
}
