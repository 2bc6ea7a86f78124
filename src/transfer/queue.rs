/*!
 * Transfer work queue
 *
 * Priority-ordered: higher priority first, FIFO within a priority level
 * via a monotone enqueue sequence. The producer deduplicates by target
 * key, so at most one task per final key ever enters the queue — the
 * final concatenation step never has two writers.
 */

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of transfer work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTask {
    pub source_key: String,
    pub target_key: String,
    pub priority: u8,
    /// Enqueue sequence, breaks priority ties FIFO
    pub seq: u64,
    pub enqueued_at: DateTime<Utc>,
}

impl PartialEq for TransferTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for TransferTask {}

impl Ord for TransferTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then lower sequence (earlier)
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TransferTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of an enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// A task for the same target key is already queued or was admitted
    DuplicateTarget,
}

/// Priority work queue with target-key deduplication
pub struct WorkQueue {
    heap: BinaryHeap<TransferTask>,
    targets: HashSet<String>,
    next_seq: u64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            targets: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Add a task unless its target key is already claimed
    pub fn enqueue(&mut self, source_key: &str, target_key: &str, priority: u8) -> Enqueued {
        if !self.targets.insert(target_key.to_string()) {
            tracing::debug!(target_key, "duplicate target rejected at enqueue");
            return Enqueued::DuplicateTarget;
        }

        let task = TransferTask {
            source_key: source_key.to_string(),
            target_key: target_key.to_string(),
            priority,
            seq: self.next_seq,
            enqueued_at: Utc::now(),
        };
        self.next_seq += 1;
        self.heap.push(task);
        Enqueued::Accepted
    }

    /// Remove and return the highest-priority task.
    /// The target key stays claimed: re-enqueueing the same final key
    /// after a pop would still race the in-flight transfer.
    pub fn pop(&mut self) -> Option<TransferTask> {
        self.heap.pop()
    }

    /// Release a target-key claim after a task permanently leaves the
    /// system (verified or abandoned), allowing a later re-enqueue
    pub fn release_target(&mut self, target_key: &str) {
        self.targets.remove(target_key);
    }

    /// Put a popped task back, keeping its priority and original
    /// sequence; the target-key claim is still held
    pub fn requeue(&mut self, task: TransferTask) {
        self.heap.push(task);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
