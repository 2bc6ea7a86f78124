/*!
 * Transfer engine
 *
 * Drains the priority work queue with a bounded pool of OS threads whose
 * size is recomputed from system load before every admission. Each object
 * moves in resumable chunks: ranged reads from the source land as part
 * objects in the target, the completed-chunk set persists after every
 * chunk, and a final in-order concatenation produces the target object.
 */

pub mod bandwidth;
pub mod chunks;
pub mod delta;
pub mod engine;
pub mod metrics;
pub mod queue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use bandwidth::BandwidthLimiter;
pub use chunks::{ChunkMetadata, ChunkMetadataStore, TransferStatus};
pub use engine::{TransferEngine, TransferOutcome, TransferReport};
pub use metrics::{MetricsLog, TransferMetric};
pub use queue::{Enqueued, TransferTask, WorkQueue};

/// Cooperative cancellation flag shared between the engine, the signal
/// wiring of the caller, and rollback
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Worker-pool bound for the current system load: full width when the
/// system is at most half busy, the midpoint up to 75%, the floor above
pub fn optimal_threads(load_percent: f32, min_threads: usize, max_threads: usize) -> usize {
    if load_percent <= 50.0 {
        max_threads
    } else if load_percent <= 75.0 {
        (min_threads + max_threads) / 2
    } else {
        min_threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_optimal_threads_bands() {
        assert_eq!(optimal_threads(10.0, 2, 8), 8);
        assert_eq!(optimal_threads(50.0, 2, 8), 8);
        assert_eq!(optimal_threads(60.0, 2, 8), 5);
        assert_eq!(optimal_threads(75.0, 2, 8), 5);
        assert_eq!(optimal_threads(90.0, 2, 8), 2);
    }
}
