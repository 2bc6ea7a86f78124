/*!
 * Retry policy shared by the transfer engine and the recovery controller
 *
 * One policy object owns the retry semantics (attempt ceiling, backoff
 * shape, jitter) so chunk retries and recovery-queue retries behave the
 * same way.
 */

use std::time::Duration;

use rand::Rng;

/// Backoff strategy between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay every attempt
    Fixed,
    /// Delay × attempt number
    Linear,
    /// Delay × 2^(attempt-1)
    Exponential,
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Base delay between attempts
    pub delay: Duration,

    /// Backoff strategy
    pub backoff: BackoffStrategy,

    /// Maximum delay after backoff
    pub max_delay: Duration,

    /// Jitter factor (0.0-1.0) added to each delay
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
            backoff: BackoffStrategy::Fixed,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Policy for chunk fetch/put operations: the classic 3 × 5s
    pub fn chunks(retry_limit: u32, delay_secs: u64) -> Self {
        Self {
            max_attempts: retry_limit.max(1),
            delay: Duration::from_secs(delay_secs),
            ..Default::default()
        }
    }

    /// Policy for network-flaky operations with spread-out retries
    pub fn network() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
            backoff: BackoffStrategy::Exponential,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.3,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = match self.backoff {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Linear => self.delay * attempt,
            BackoffStrategy::Exponential => self.delay * 2_u32.saturating_pow(attempt - 1),
        };
        let capped = base.min(self.max_delay);

        if self.jitter_factor > 0.0 {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor);
            capped + Duration::from_secs_f64(capped.as_secs_f64() * jitter)
        } else {
            capped
        }
    }

    /// Run `operation` up to `max_attempts` times, sleeping between
    /// attempts. Fatal errors (per `is_fatal`) stop retrying immediately.
    pub fn run<T, E, F, P>(&self, mut operation: F, is_fatal: P) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_attempts || is_fatal(&e) {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    tracing::debug!(attempt, ?delay, "retrying after failure");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::chunks(3, 5);
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_delay_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            delay: Duration::from_secs(5),
            backoff: BackoffStrategy::Exponential,
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = fast(5).run(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            },
            |_| false,
        );
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_exhausts_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), &str> = fast(3).run(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("always")
            },
            |_| false,
        );
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_fatal_stops_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), &str> = fast(5).run(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("fatal")
            },
            |e| *e == "fatal",
        );
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
