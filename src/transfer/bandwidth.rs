/*!
 * Bandwidth throttling with token-bucket rate limiting
 *
 * One limiter is shared by every transfer worker, so the configured
 * ceiling applies to the run as a whole rather than per thread.
 */

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Run-wide bandwidth ceiling
#[derive(Clone)]
pub struct BandwidthLimiter {
    limiter: Option<Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
    bytes_per_token: u64,
}

impl BandwidthLimiter {
    /// Create a limiter for `max_bytes_per_sec` (0 = unlimited)
    pub fn new(max_bytes_per_sec: u64) -> Self {
        if max_bytes_per_sec == 0 {
            return Self {
                limiter: None,
                bytes_per_token: 0,
            };
        }

        // 1000 tokens per second; each token covers bytes_per_sec/1000
        // bytes, floored to 1 so tiny ceilings still make progress
        let tokens_per_sec = 1000u32;
        let bytes_per_token = (max_bytes_per_sec / tokens_per_sec as u64).max(1);
        let quota = Quota::per_second(NonZeroU32::new(tokens_per_sec).expect("non-zero literal"));

        Self {
            limiter: Some(Arc::new(RateLimiter::direct(quota))),
            bytes_per_token,
        }
    }

    /// Block until the bucket can cover `bytes`
    pub fn throttle(&self, bytes: u64) {
        let Some(limiter) = &self.limiter else { return };

        let tokens_needed = (bytes / self.bytes_per_token).max(1) as u32;
        if let Some(tokens) = NonZeroU32::new(tokens_needed) {
            while limiter.check_n(tokens).is_err() {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }
}
