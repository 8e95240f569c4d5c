//! Lock repository.
//!
//! Critical sections keyed by ticket id. The registry wraps every
//! read-modify-write of a ticket in [`LockRepository::execute`] so that
//! concurrent grants and consumptions on the same ticket serialize.
//!
//! Locks are not reentrant: a critical section must never enter another one.
//! With [`MaskedHashLockRepository`] two distinct keys may share a slot, so a
//! nested acquisition could wait on itself until the timeout fires.

use crate::config::LockConfig;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::sync::Mutex;

/// Runs closures under per-key mutual exclusion.
pub trait LockRepository: Send + Sync {
    /// Run `section` while holding the lock for `key`.
    ///
    /// # Returns
    ///
    /// - `Some(value)`: the lock was acquired and `section` ran to completion
    /// - `None`: the lock could not be acquired in time; `section` never ran
    fn execute<T, F, Fut>(&self, key: &str, section: F) -> impl Future<Output = Option<T>> + Send
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send;
}

/// Lock repository that never locks.
///
/// Suitable for single-threaded embedding or when the store itself
/// serializes access.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLockRepository;

impl LockRepository for NoOpLockRepository {
    async fn execute<T, F, Fut>(&self, _key: &str, section: F) -> Option<T>
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
    {
        Some(section().await)
    }
}

/// Largest supported table exponent (about a million slots).
const MAX_TABLE_BITS: u32 = 20;

/// In-process lock table addressed by a masked key hash.
///
/// Holds `2^n` async mutexes; a key maps to slot `hash(key) & (2^n - 1)`.
/// Memory stays bounded no matter how many ticket ids pass through, at the
/// price of occasional false sharing between unrelated keys.
#[derive(Debug)]
pub struct MaskedHashLockRepository {
    slots: Box<[Mutex<()>]>,
    mask: u64,
    timeout: Duration,
}

impl MaskedHashLockRepository {
    /// Create a table of `2^bits` locks with the given acquisition timeout.
    #[must_use]
    pub fn new(bits: u32, timeout: Duration) -> Self {
        let bits = bits.min(MAX_TABLE_BITS);
        let size = 1_usize << bits;
        Self {
            slots: (0..size).map(|_| Mutex::new(())).collect(),
            mask: (1_u64 << bits) - 1,
            timeout,
        }
    }

    /// Create from configuration.
    #[must_use]
    pub fn from_config(config: &LockConfig) -> Self {
        Self::new(config.table_bits, config.timeout)
    }

    /// Number of lock slots.
    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Mask applied to key hashes (`size - 1`).
    #[must_use]
    pub const fn mask(&self) -> u64 {
        self.mask
    }

    fn slot(&self, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() & self.mask) as usize;
        &self.slots[index]
    }
}

impl Default for MaskedHashLockRepository {
    fn default() -> Self {
        Self::from_config(&LockConfig::default())
    }
}

impl LockRepository for MaskedHashLockRepository {
    async fn execute<T, F, Fut>(&self, key: &str, section: F) -> Option<T>
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
    {
        let slot = self.slot(key);
        let Ok(_guard) = tokio::time::timeout(self.timeout, slot.lock()).await else {
            tracing::warn!(
                lock_key = %key,
                timeout_ms = self.timeout.as_millis(),
                "Timed out waiting for lock"
            );
            metrics::counter!(crate::metrics::LOCK_TIMEOUTS_TOTAL).increment(1);
            return None;
        };

        Some(section().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_table_size_is_power_of_two() {
        let locks = MaskedHashLockRepository::new(4, Duration::from_secs(1));
        assert_eq!(locks.size(), 16);
        assert_eq!(locks.mask(), 15);
    }

    #[test]
    fn test_table_bits_are_capped() {
        let locks = MaskedHashLockRepository::new(64, Duration::from_secs(1));
        assert_eq!(locks.size(), 1 << MAX_TABLE_BITS);
    }

    #[tokio::test]
    async fn test_noop_always_runs() {
        let value = NoOpLockRepository.execute("k", || async { 7 }).await;
        assert_eq!(value, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_contended_key_times_out_without_running() {
        let locks = Arc::new(MaskedHashLockRepository::new(4, Duration::from_secs(3)));

        let holder = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks
                    .execute("TGT-1", || async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        "held"
                    })
                    .await
            })
        };
        // Let the holder take the lock first.
        tokio::task::yield_now().await;

        let ran = AtomicBool::new(false);
        let flag = &ran;
        let waiter = locks
            .execute("TGT-1", move || async move {
                flag.store(true, Ordering::SeqCst);
            })
            .await;

        assert!(waiter.is_none());
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(holder.await.unwrap(), Some("held"));

        // Free again once the holder is done.
        assert_eq!(locks.execute("TGT-1", || async { 1 }).await, Some(1));
    }
}
