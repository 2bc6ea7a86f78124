/*!
 * Chunk metadata
 *
 * Per-transfer resumption state: which chunk indices have landed in the
 * target as part objects. Persisted through the keyed record store before
 * the first byte moves; the completed set is the resumption checkpoint a
 * crashed run restarts from. One writer per transfer id, so updates go
 * through compare-and-swap without cross-transfer contention.
 */

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ExodusError, Result};
use crate::kv::{Expected, KvStore};

/// Record-store namespace for chunk metadata
pub const CHUNKS_NAMESPACE: &str = "chunks";

/// Transfer lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Started,
    Completed,
    Failed,
}

/// Resumption state for one chunked transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub transfer_id: String,
    pub source_key: String,
    pub target_key: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub completed_chunks: BTreeSet<u32>,
    pub status: TransferStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ChunkMetadata {
    /// Start a new transfer record
    pub fn new(source_key: &str, target_key: &str, total_size: u64, chunk_size: u64) -> Self {
        Self {
            transfer_id: new_transfer_id(),
            source_key: source_key.to_string(),
            target_key: target_key.to_string(),
            total_size,
            chunk_size,
            total_chunks: chunk_count(total_size, chunk_size),
            completed_chunks: BTreeSet::new(),
            status: TransferStatus::Started,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Byte range of chunk `index`: (offset, length)
    pub fn chunk_range(&self, index: u32) -> (u64, u64) {
        let offset = index as u64 * self.chunk_size;
        let len = self.chunk_size.min(self.total_size - offset);
        (offset, len)
    }

    /// Target key for one part object
    pub fn part_key(&self, index: u32) -> String {
        format!("{}.part.{}.{}", self.target_key, self.transfer_id, index)
    }

    /// Chunk indices still to transfer, in order
    pub fn remaining_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.completed_chunks.contains(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_chunks.len() as u32 == self.total_chunks
    }

    /// Invariant check: completed ⊆ [0, total); completed status implies
    /// every index present
    pub fn check_invariants(&self) -> Result<()> {
        if let Some(&max) = self.completed_chunks.iter().next_back() {
            if max >= self.total_chunks {
                return Err(ExodusError::Metadata(format!(
                    "chunk index {} out of range for {} chunks ({})",
                    max, self.total_chunks, self.transfer_id
                )));
            }
        }
        if self.status == TransferStatus::Completed && !self.is_complete() {
            return Err(ExodusError::Metadata(format!(
                "transfer {} marked completed with {}/{} chunks",
                self.transfer_id,
                self.completed_chunks.len(),
                self.total_chunks
            )));
        }
        Ok(())
    }
}

/// `ceil(total_size / chunk_size)`, minimum one chunk for empty objects
pub fn chunk_count(total_size: u64, chunk_size: u64) -> u32 {
    if total_size == 0 {
        return 1;
    }
    total_size.div_ceil(chunk_size) as u32
}

fn new_transfer_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill(&mut bytes);
    format!("tx-{}", hex::encode(bytes))
}

/// Chunk metadata persistence over the keyed record store
pub struct ChunkMetadataStore<'a> {
    kv: &'a KvStore,
}

impl<'a> ChunkMetadataStore<'a> {
    pub fn new(kv: &'a KvStore) -> Self {
        Self { kv }
    }

    /// Persist a brand-new record; the transfer id must be unused
    pub fn create(&self, metadata: &ChunkMetadata) -> Result<u64> {
        metadata.check_invariants()?;
        self.kv.put(
            CHUNKS_NAMESPACE,
            &metadata.transfer_id,
            metadata,
            Expected::Absent,
        )
    }

    /// Load a record with its version for later CAS updates
    pub fn load(&self, transfer_id: &str) -> Result<Option<(ChunkMetadata, u64)>> {
        self.kv.get(CHUNKS_NAMESPACE, transfer_id)
    }

    /// CAS-update a record; returns the new version
    pub fn update(&self, metadata: &ChunkMetadata, version: u64) -> Result<u64> {
        metadata.check_invariants()?;
        self.kv.put(
            CHUNKS_NAMESPACE,
            &metadata.transfer_id,
            metadata,
            Expected::Version(version),
        )
    }

    /// Every record not yet completed, for resume-on-restart
    pub fn incomplete(&self) -> Result<Vec<ChunkMetadata>> {
        let mut records = Vec::new();
        for key in self.kv.keys(CHUNKS_NAMESPACE)? {
            if let Some((metadata, _)) = self.kv.get::<ChunkMetadata>(CHUNKS_NAMESPACE, &key)? {
                if metadata.status != TransferStatus::Completed {
                    records.push(metadata);
                }
            }
        }
        Ok(records)
    }

    /// Look up any record for a target key, regardless of status
    pub fn find_by_target(&self, target_key: &str) -> Result<Option<(ChunkMetadata, u64)>> {
        for key in self.kv.keys(CHUNKS_NAMESPACE)? {
            if let Some((metadata, version)) =
                self.kv.get::<ChunkMetadata>(CHUNKS_NAMESPACE, &key)?
            {
                if metadata.target_key == target_key {
                    return Ok(Some((metadata, version)));
                }
            }
        }
        Ok(None)
    }

    /// Look up the active (non-completed) record for a source/target pair
    pub fn find_active(&self, source_key: &str, target_key: &str) -> Result<Option<(ChunkMetadata, u64)>> {
        for key in self.kv.keys(CHUNKS_NAMESPACE)? {
            if let Some((metadata, version)) =
                self.kv.get::<ChunkMetadata>(CHUNKS_NAMESPACE, &key)?
            {
                if metadata.source_key == source_key
                    && metadata.target_key == target_key
                    && metadata.status != TransferStatus::Completed
                {
                    return Ok(Some((metadata, version)));
                }
            }
        }
        Ok(None)
    }

    /// Drop a record (after verification or rollback)
    pub fn remove(&self, transfer_id: &str) -> Result<()> {
        self.kv.delete(CHUNKS_NAMESPACE, transfer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_chunk_count_math() {
        const MB: u64 = 1024 * 1024;
        assert_eq!(chunk_count(50 * MB, 5 * MB), 10);
        assert_eq!(chunk_count(50 * MB + 1, 5 * MB), 11);
        assert_eq!(chunk_count(1, 5 * MB), 1);
        assert_eq!(chunk_count(0, 5 * MB), 1);
    }

    #[test]
    fn test_chunk_ranges() {
        let metadata = ChunkMetadata::new("a", "t/a", 25, 10);
        assert_eq!(metadata.total_chunks, 3);
        assert_eq!(metadata.chunk_range(0), (0, 10));
        assert_eq!(metadata.chunk_range(1), (10, 10));
        assert_eq!(metadata.chunk_range(2), (20, 5));
    }

    #[test]
    fn test_remaining_skips_completed() {
        let mut metadata = ChunkMetadata::new("a", "t/a", 100, 10);
        metadata.completed_chunks.insert(0);
        metadata.completed_chunks.insert(1);
        metadata.completed_chunks.insert(2);
        assert_eq!(metadata.remaining_chunks(), vec![3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_invariants() {
        let mut metadata = ChunkMetadata::new("a", "t/a", 100, 10);
        metadata.check_invariants().unwrap();

        metadata.completed_chunks.insert(10);
        assert!(metadata.check_invariants().is_err());

        metadata.completed_chunks.remove(&10);
        metadata.status = TransferStatus::Completed;
        assert!(metadata.check_invariants().is_err());

        metadata.completed_chunks.extend(0..10);
        metadata.check_invariants().unwrap();
    }

    #[test]
    fn test_unique_transfer_ids() {
        let a = ChunkMetadata::new("a", "t/a", 1, 1);
        let b = ChunkMetadata::new("a", "t/a", 1, 1);
        assert_ne!(a.transfer_id, b.transfer_id);
        assert!(a.transfer_id.starts_with("tx-"));
    }

    #[test]
    fn test_store_roundtrip_and_incomplete() {
        let dir = tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let store = ChunkMetadataStore::new(&kv);

        let mut metadata = ChunkMetadata::new("a.bin", "t/a.bin", 100, 10);
        let version = store.create(&metadata).unwrap();

        metadata.completed_chunks.insert(0);
        let version = store.update(&metadata, version).unwrap();

        assert_eq!(store.incomplete().unwrap().len(), 1);

        metadata.completed_chunks.extend(1..10);
        metadata.status = TransferStatus::Completed;
        metadata.finished_at = Some(Utc::now());
        store.update(&metadata, version).unwrap();

        assert!(store.incomplete().unwrap().is_empty());
        let (loaded, _) = store.load(&metadata.transfer_id).unwrap().unwrap();
        assert_eq!(loaded.status, TransferStatus::Completed);
    }

    #[test]
    fn test_find_active() {
        let dir = tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let store = ChunkMetadataStore::new(&kv);

        let metadata = ChunkMetadata::new("a.bin", "t/a.bin", 100, 10);
        store.create(&metadata).unwrap();

        let found = store.find_active("a.bin", "t/a.bin").unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().0.transfer_id, metadata.transfer_id);
        assert!(store.find_active("other", "t/a.bin").unwrap().is_none());
    }
}
