//! Redis-based distributed lock repository.
//!
//! # Architecture
//!
//! A lock is the key `sso:lock:{key}` holding a random owner token:
//! - **Acquire**: `SET key token NX PX lease`, polled until the wait timeout
//! - **Release**: compare-and-delete Lua script, so a holder whose lease
//!   expired never removes a lock now owned by someone else
//! - **Lease**: bounds how long a crashed node can block a key
//!
//! The critical section must finish within the lease; otherwise another node
//! may enter it concurrently.

use crate::config::LockConfig;
use crate::error::{Result, TicketError};
use crate::lock::LockRepository;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use redis::Client;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Key namespace for locks.
const KEY_PREFIX: &str = "sso:lock:";

/// Delay between acquisition attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Deletes the lock only if it still carries our token.
const RELEASE_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

/// Lease-based lock repository shared by all nodes of a cluster.
#[derive(Clone)]
pub struct RedisLockRepository {
    conn_manager: ConnectionManager,
    timeout: Duration,
    lease: Duration,
}

impl RedisLockRepository {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns error if connection to Redis fails.
    pub async fn new(redis_url: &str, config: &LockConfig) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| TicketError::Storage(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            TicketError::Storage(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self {
            conn_manager,
            timeout: config.timeout,
            lease: config.lease,
        })
    }

    fn lock_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    fn owner_token() -> String {
        let mut bytes = [0_u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    async fn try_acquire(&self, key: &str, token: &str) -> redis::RedisResult<bool> {
        let mut conn = self.conn_manager.clone();
        #[allow(clippy::cast_possible_truncation)]
        let lease_ms = self.lease.as_millis().max(1) as u64;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(lease_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn acquire(&self, key: &str, token: &str) -> bool {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.try_acquire(key, token).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(lock_key = %key, error = %e, "Redis lock acquisition failed");
                    return false;
                }
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn release(&self, key: &str, token: &str) {
        let mut conn = self.conn_manager.clone();
        let released: redis::RedisResult<i64> = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await;

        match released {
            Ok(1) => {}
            Ok(_) => tracing::warn!(lock_key = %key, "Lock lease expired before release"),
            Err(e) => tracing::warn!(lock_key = %key, error = %e, "Failed to release Redis lock"),
        }
    }
}

impl std::fmt::Debug for RedisLockRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockRepository")
            .field("timeout", &self.timeout)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl LockRepository for RedisLockRepository {
    async fn execute<T, F, Fut>(&self, key: &str, section: F) -> Option<T>
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
    {
        let lock_key = Self::lock_key(key);
        let token = Self::owner_token();

        if !self.acquire(&lock_key, &token).await {
            tracing::warn!(
                lock_key = %key,
                timeout_ms = self.timeout.as_millis(),
                "Timed out waiting for distributed lock"
            );
            metrics::counter!(crate::metrics::LOCK_TIMEOUTS_TOTAL).increment(1);
            return None;
        }

        let value = section().await;
        self.release(&lock_key, &token).await;
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_contended_lock_times_out() {
        let config = LockConfig::default()
            .with_timeout(Duration::from_millis(300))
            .with_lease(Duration::from_secs(5));
        let locks = Arc::new(
            RedisLockRepository::new("redis://127.0.0.1:6379", &config)
                .await
                .unwrap(),
        );

        let holder = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks
                    .execute("redis-lock-test", || async {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(locks.execute("redis-lock-test", || async {}).await.is_none());
        assert!(holder.await.unwrap().is_some());
        assert!(locks.execute("redis-lock-test", || async {}).await.is_some());
    }
}
