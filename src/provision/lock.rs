/*!
 * Per-category provisioning locks
 *
 * Exclusive in-process locks keyed by category name. Acquisition polls at
 * one-second intervals up to a 30-second ceiling, then surfaces
 * `LockTimeout` as a recoverable error instead of blocking indefinitely.
 * Different categories provision concurrently; within a category the lock
 * serializes every mutating operation.
 */

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::{ExodusError, Result};

/// Wait ceiling for lock acquisition
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct Holder {
    holder: String,
    acquired_at: DateTime<Utc>,
}

struct LockState {
    held: Mutex<HashMap<String, Holder>>,
    released: Condvar,
}

/// Registry of category locks, shared across provisioning threads
#[derive(Clone)]
pub struct CategoryLocks {
    state: Arc<LockState>,
}

impl CategoryLocks {
    pub fn new() -> Self {
        Self {
            state: Arc::new(LockState {
                held: Mutex::new(HashMap::new()),
                released: Condvar::new(),
            }),
        }
    }

    /// Acquire the lock for `category`, waiting up to the ceiling.
    /// The returned guard releases on drop.
    pub fn acquire(&self, category: &str, holder: &str) -> Result<CategoryLockGuard> {
        self.acquire_with_timeout(category, holder, ACQUIRE_TIMEOUT)
    }

    /// Acquire with an explicit ceiling (tests use short ones)
    pub fn acquire_with_timeout(
        &self,
        category: &str,
        holder: &str,
        timeout: Duration,
    ) -> Result<CategoryLockGuard> {
        let deadline = Instant::now() + timeout;
        let mut held = self.state.held.lock().unwrap();

        while held.contains_key(category) {
            let now = Instant::now();
            if now >= deadline {
                return Err(ExodusError::LockTimeout {
                    category: category.to_string(),
                });
            }
            let wait = POLL_INTERVAL.min(deadline - now);
            let (guard, _) = self.state.released.wait_timeout(held, wait).unwrap();
            held = guard;
        }

        held.insert(
            category.to_string(),
            Holder {
                holder: holder.to_string(),
                acquired_at: Utc::now(),
            },
        );
        tracing::debug!(category, holder, "category lock acquired");

        Ok(CategoryLockGuard {
            state: self.state.clone(),
            category: category.to_string(),
        })
    }

    /// Who holds a category lock, if anyone
    pub fn holder_of(&self, category: &str) -> Option<(String, DateTime<Utc>)> {
        self.state
            .held
            .lock()
            .unwrap()
            .get(category)
            .map(|h| (h.holder.clone(), h.acquired_at))
    }
}

impl Default for CategoryLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Held category lock; releases on drop
pub struct CategoryLockGuard {
    state: Arc<LockState>,
    category: String,
}

impl CategoryLockGuard {
    pub fn category(&self) -> &str {
        &self.category
    }
}

impl Drop for CategoryLockGuard {
    fn drop(&mut self) {
        self.state.held.lock().unwrap().remove(&self.category);
        self.state.released.notify_all();
        tracing::debug!(category = %self.category, "category lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_acquire_and_release() {
        let locks = CategoryLocks::new();
        {
            let guard = locks.acquire("media", "worker-1").unwrap();
            assert_eq!(guard.category(), "media");
            assert!(locks.holder_of("media").is_some());
        }
        assert!(locks.holder_of("media").is_none());
    }

    #[test]
    fn test_different_categories_do_not_contend() {
        let locks = CategoryLocks::new();
        let _media = locks.acquire("media", "a").unwrap();
        let _configs = locks
            .acquire_with_timeout("configs", "b", Duration::from_millis(50))
            .unwrap();
    }

    #[test]
    fn test_second_acquirer_times_out() {
        let locks = CategoryLocks::new();
        let _held = locks.acquire("media", "first").unwrap();

        let result = locks.acquire_with_timeout("media", "second", Duration::from_millis(80));
        assert!(matches!(result, Err(ExodusError::LockTimeout { .. })));
    }

    #[test]
    fn test_waiter_proceeds_after_release() {
        let locks = CategoryLocks::new();
        let guard = locks.acquire("media", "first").unwrap();

        let locks_clone = locks.clone();
        let waiter = thread::spawn(move || {
            locks_clone
                .acquire_with_timeout("media", "second", Duration::from_secs(5))
                .is_ok()
        });

        thread::sleep(Duration::from_millis(50));
        drop(guard);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_mutual_exclusion() {
        let locks = CategoryLocks::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let locks = locks.clone();
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(thread::spawn(move || {
                let _guard = locks
                    .acquire_with_timeout("media", &format!("w{}", i), Duration::from_secs(10))
                    .unwrap();
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
