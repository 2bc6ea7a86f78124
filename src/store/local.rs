/*!
 * Directory-backed object store
 *
 * Models a bucket as a directory tree: each object is a file, keys are
 * slash-separated relative paths. This is the store the test suite runs
 * against and the backend for staging-disk migrations.
 */

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::{ObjectEntry, ObjectInfo, ObjectStore, StoreError, StoreResult};

/// Bucket rooted at a local directory
pub struct LocalStore {
    root: PathBuf,
    name: String,
}

impl LocalStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| map_io_error(e, root.display()))?;
        Ok(Self {
            root,
            name: name.into(),
        })
    }

    /// Root directory backing this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|c| c == "..") {
            return Err(StoreError::Invalid(format!("malformed key: {:?}", key)));
        }
        Ok(self.root.join(key))
    }

    fn open(&self, key: &str) -> StoreResult<File> {
        let path = self.key_path(key)?;
        File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound {
                    key: key.to_string(),
                }
            } else {
                map_io_error(e, key)
            }
        })
    }
}

fn map_io_error(e: io::Error, context: impl std::fmt::Display) -> StoreError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => {
            StoreError::PermissionDenied(format!("{}: {}", context, e))
        }
        _ => StoreError::Unavailable(format!("{}: {}", context, e)),
    }
}

impl ObjectStore for LocalStore {
    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if !key.starts_with(prefix) {
                continue;
            }

            let meta = entry
                .metadata()
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let last_modified = meta
                .modified()
                .ok()
                .map(|t| DateTime::<Utc>::from(t));

            entries.push(ObjectEntry {
                key,
                size: meta.len(),
                last_modified,
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let mut file = self.open(key)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| map_io_error(e, key))?;
        Ok(buf)
    }

    fn get_range(&self, key: &str, offset: u64, len: u64) -> StoreResult<Vec<u8>> {
        let mut file = self.open(key)?;
        let size = file
            .metadata()
            .map_err(|e| map_io_error(e, key))?
            .len();
        if offset > size {
            return Err(StoreError::Invalid(format!(
                "range start {} beyond object size {} for {}",
                offset, size, key
            )));
        }

        file.seek(SeekFrom::Start(offset))
            .map_err(|e| map_io_error(e, key))?;
        let take = len.min(size - offset);
        let mut buf = vec![0u8; take as usize];
        file.read_exact(&mut buf)
            .map_err(|e| map_io_error(e, key))?;
        Ok(buf)
    }

    fn put(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| map_io_error(e, key))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| map_io_error(e, key))?;
        file.write_all(data).map_err(|e| map_io_error(e, key))?;
        file.flush().map_err(|e| map_io_error(e, key))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.key_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io_error(e, key)),
        }
    }

    fn info(&self, key: &str) -> StoreResult<ObjectInfo> {
        let mut file = self.open(key)?;
        let size = file
            .metadata()
            .map_err(|e| map_io_error(e, key))?
            .len();

        // Content-derived etag, analogous to a single-part S3 etag
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let n = file
                .read(&mut buffer)
                .map_err(|e| map_io_error(e, key))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(ObjectInfo {
            size,
            etag: Some(hex::encode(hasher.finalize())),
        })
    }

    fn copy(&self, src_key: &str, dst_key: &str) -> StoreResult<()> {
        let src = self.key_path(src_key)?;
        let dst = self.key_path(dst_key)?;
        if !src.exists() {
            return Err(StoreError::NotFound {
                key: src_key.to_string(),
            });
        }
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| map_io_error(e, dst_key))?;
        }
        std::fs::copy(&src, &dst).map_err(|e| map_io_error(e, dst_key))?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "test").unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = store();
        store.put("media/a.bin", b"hello world").unwrap();
        assert_eq!(store.get("media/a.bin").unwrap(), b"hello world");
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, store) = store();
        match store.get("nope.bin") {
            Err(StoreError::NotFound { key }) => assert_eq!(key, "nope.bin"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_get_range() {
        let (_dir, store) = store();
        store.put("r.bin", b"0123456789").unwrap();
        assert_eq!(store.get_range("r.bin", 2, 4).unwrap(), b"2345");
        // Range truncated at object end
        assert_eq!(store.get_range("r.bin", 8, 10).unwrap(), b"89");
    }

    #[test]
    fn test_list_with_prefix() {
        let (_dir, store) = store();
        store.put("media/a.bin", b"a").unwrap();
        store.put("media/sub/b.bin", b"bb").unwrap();
        store.put("configs/c.json", b"{}").unwrap();

        let media = store.list("media/").unwrap();
        assert_eq!(media.len(), 2);
        assert_eq!(media[0].key, "media/a.bin");
        assert_eq!(media[1].key, "media/sub/b.bin");
        assert_eq!(media[1].size, 2);

        let all = store.list("").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, store) = store();
        store.put("d.bin", b"x").unwrap();
        store.delete("d.bin").unwrap();
        store.delete("d.bin").unwrap();
        assert!(!store.exists("d.bin").unwrap());
    }

    #[test]
    fn test_info_etag_tracks_content() {
        let (_dir, store) = store();
        store.put("e.bin", b"same").unwrap();
        let first = store.info("e.bin").unwrap();
        store.put("f.bin", b"same").unwrap();
        let second = store.info("f.bin").unwrap();
        assert_eq!(first.etag, second.etag);
        assert_eq!(first.size, 4);

        store.put("e.bin", b"different").unwrap();
        let third = store.info("e.bin").unwrap();
        assert_ne!(first.etag, third.etag);
    }

    #[test]
    fn test_copy() {
        let (_dir, store) = store();
        store.put("src.bin", b"payload").unwrap();
        store.copy("src.bin", "deep/dst.bin").unwrap();
        assert_eq!(store.get("deep/dst.bin").unwrap(), b"payload");
    }

    #[test]
    fn test_malformed_keys_rejected() {
        let (_dir, store) = store();
        assert!(store.get("../escape").is_err());
        assert!(store.put("/absolute", b"x").is_err());
        assert!(store.get("").is_err());
    }
}
