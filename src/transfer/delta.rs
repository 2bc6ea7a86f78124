/*!
 * Block-level delta transfers
 *
 * When the target already holds a copy of an object, both sides are split
 * into fixed-size blocks and hashed; only blocks whose hashes differ are
 * rewritten. Identical objects skip the write entirely. Block hashes use
 * BLAKE3, which is cheap enough to hash both sides at block granularity.
 */

use std::sync::Arc;

use crate::error::{ExodusError, Result};
use crate::store::ObjectStore;

/// Outcome of a delta comparison and apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaStats {
    pub total_blocks: u32,
    pub changed_blocks: u32,
    /// Bytes pulled from the source for changed blocks
    pub bytes_fetched: u64,
    /// Bytes reused from the existing target copy
    pub bytes_reused: u64,
}

impl DeltaStats {
    pub fn unchanged(&self) -> bool {
        self.changed_blocks == 0
    }
}

/// BLAKE3 hash per fixed-size block
pub fn block_hashes(data: &[u8], block_size: u64) -> Vec<blake3::Hash> {
    if data.is_empty() {
        return Vec::new();
    }
    data.chunks(block_size as usize)
        .map(blake3::hash)
        .collect()
}

/// Indices of blocks that differ between two hash lists.
/// Length differences mark every trailing block as changed.
pub fn diff_blocks(source: &[blake3::Hash], target: &[blake3::Hash]) -> Vec<u32> {
    let longest = source.len().max(target.len());
    (0..longest)
        .filter(|&i| match (source.get(i), target.get(i)) {
            (Some(s), Some(t)) => s != t,
            _ => true,
        })
        .map(|i| i as u32)
        .collect()
}

/// Rebuild `target_key` from the existing target copy plus only the
/// changed source blocks. Returns None when the target copy is absent
/// (caller falls back to a full chunked transfer).
pub fn apply_delta(
    source: &Arc<dyn ObjectStore>,
    target: &Arc<dyn ObjectStore>,
    source_key: &str,
    target_key: &str,
    block_size: u64,
) -> Result<Option<DeltaStats>> {
    if block_size == 0 {
        return Err(ExodusError::Config("delta block size must be non-zero".to_string()));
    }
    if !target.exists(target_key)? {
        return Ok(None);
    }

    let target_data = target.get(target_key)?;
    let source_size = source.info(source_key)?.size;

    let target_hashes = block_hashes(&target_data, block_size);
    let source_blocks = if source_size == 0 {
        0
    } else {
        source_size.div_ceil(block_size)
    } as usize;

    // Hash source blocks from ranged reads; only differing blocks are
    // kept for the rewrite
    let mut changed = Vec::new();
    let mut fetched_blocks: Vec<(u32, Vec<u8>)> = Vec::new();

    for index in 0..source_blocks.max(target_hashes.len()) {
        let offset = index as u64 * block_size;
        if offset >= source_size {
            // Source is shorter; trailing target blocks are dropped
            changed.push(index as u32);
            continue;
        }
        let len = block_size.min(source_size - offset);
        let block = source.get_range(source_key, offset, len)?;

        let differs = match target_hashes.get(index) {
            Some(t) => blake3::hash(&block) != *t,
            None => true,
        };
        if differs {
            changed.push(index as u32);
            fetched_blocks.push((index as u32, block));
        }
    }

    let rewritten: u64 = fetched_blocks.iter().map(|(_, b)| b.len() as u64).sum();
    let stats = DeltaStats {
        total_blocks: source_blocks.max(target_hashes.len()) as u32,
        changed_blocks: changed.len() as u32,
        bytes_fetched: rewritten,
        bytes_reused: source_size.saturating_sub(rewritten),
    };

    if stats.unchanged() && source_size == target_data.len() as u64 {
        tracing::debug!(target_key, "delta found no changed blocks");
        return Ok(Some(stats));
    }

    // Assemble: reused target blocks plus fetched source blocks
    let mut assembled = vec![0u8; source_size as usize];
    for index in 0..source_blocks as u32 {
        let offset = (index as u64 * block_size) as usize;
        let len = block_size.min(source_size - offset as u64) as usize;
        if let Some((_, block)) = fetched_blocks.iter().find(|(i, _)| *i == index) {
            assembled[offset..offset + len].copy_from_slice(block);
        } else {
            assembled[offset..offset + len]
                .copy_from_slice(&target_data[offset..offset + len]);
        }
    }

    target.put(target_key, &assembled)?;
    tracing::info!(
        target_key,
        changed = stats.changed_blocks,
        total = stats.total_blocks,
        "delta transfer applied"
    );
    Ok(Some(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use tempfile::tempdir;

    fn stores() -> (tempfile::TempDir, tempfile::TempDir, Arc<dyn ObjectStore>, Arc<dyn ObjectStore>) {
        let source_dir = tempdir().unwrap();
        let target_dir = tempdir().unwrap();
        let source: Arc<dyn ObjectStore> =
            Arc::new(LocalStore::new(source_dir.path(), "source").unwrap());
        let target: Arc<dyn ObjectStore> =
            Arc::new(LocalStore::new(target_dir.path(), "target").unwrap());
        (source_dir, target_dir, source, target)
    }

    #[test]
    fn test_diff_blocks() {
        let a = block_hashes(b"aaaabbbbcccc", 4);
        let b = block_hashes(b"aaaaXXXXcccc", 4);
        assert_eq!(diff_blocks(&a, &b), vec![1]);

        let short = block_hashes(b"aaaabbbb", 4);
        assert_eq!(diff_blocks(&a, &short), vec![2]);

        assert_eq!(diff_blocks(&a, &a), Vec::<u32>::new());
    }

    #[test]
    fn test_identical_objects_skip_write() {
        let (_s, _t, source, target) = stores();
        source.put("a.bin", b"identical-content").unwrap();
        target.put("a.bin", b"identical-content").unwrap();

        let stats = apply_delta(&source, &target, "a.bin", "a.bin", 4)
            .unwrap()
            .unwrap();
        assert!(stats.unchanged());
        assert_eq!(stats.bytes_fetched, 0);
    }

    #[test]
    fn test_changed_blocks_rewritten() {
        let (_s, _t, source, target) = stores();
        source.put("a.bin", b"aaaaXXXXcccc").unwrap();
        target.put("a.bin", b"aaaabbbbcccc").unwrap();

        let stats = apply_delta(&source, &target, "a.bin", "a.bin", 4)
            .unwrap()
            .unwrap();
        assert_eq!(stats.total_blocks, 3);
        assert_eq!(stats.changed_blocks, 1);
        assert_eq!(stats.bytes_fetched, 4);
        assert_eq!(target.get("a.bin").unwrap(), b"aaaaXXXXcccc");
    }

    #[test]
    fn test_source_grew() {
        let (_s, _t, source, target) = stores();
        source.put("a.bin", b"aaaabbbbccccdddd").unwrap();
        target.put("a.bin", b"aaaabbbb").unwrap();

        let stats = apply_delta(&source, &target, "a.bin", "a.bin", 4)
            .unwrap()
            .unwrap();
        assert_eq!(stats.changed_blocks, 2);
        assert_eq!(target.get("a.bin").unwrap(), b"aaaabbbbccccdddd");
    }

    #[test]
    fn test_source_shrank() {
        let (_s, _t, source, target) = stores();
        source.put("a.bin", b"aaaa").unwrap();
        target.put("a.bin", b"aaaabbbbcccc").unwrap();

        let stats = apply_delta(&source, &target, "a.bin", "a.bin", 4)
            .unwrap()
            .unwrap();
        assert!(stats.changed_blocks > 0);
        assert_eq!(target.get("a.bin").unwrap(), b"aaaa");
    }

    #[test]
    fn test_absent_target_falls_back() {
        let (_s, _t, source, target) = stores();
        source.put("a.bin", b"data").unwrap();
        assert!(apply_delta(&source, &target, "a.bin", "a.bin", 4)
            .unwrap()
            .is_none());
    }
}
