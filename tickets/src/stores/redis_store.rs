//! Redis-based ticket store.
//!
//! # Architecture
//!
//! Tickets are stored in Redis with:
//! - **Primary key**: `sso:ticket:{id}` → bincode-serialized [`Ticket`]
//!   (with an encrypting [`TicketCodec`] the key carries the SHA-512 digest of
//!   the id and the value is AES-256-GCM sealed)
//! - **TTL**: the registry's eviction hint, as `PX` milliseconds
//!
//! Creation uses `SET NX` so an existing id is never overwritten, updates use
//! `SET XX`, and consumption uses `GETDEL` for atomic single use across nodes.
//!
//! # Example
//!
//! ```no_run
//! use sso_tickets::stores::RedisTicketStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisTicketStore::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

use crate::cipher::TicketCodec;
use crate::error::{Result, TicketError};
use crate::providers::TicketStore;
use crate::ticket::{Ticket, TicketId};
use futures::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// Key namespace for tickets.
const KEY_PREFIX: &str = "sso:ticket:";

/// Keys fetched per `SCAN` round trip.
const SCAN_BATCH: usize = 100;

/// Redis-backed ticket store shared by all nodes of a cluster.
#[derive(Clone)]
pub struct RedisTicketStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,

    /// Payload and key encoding.
    codec: TicketCodec,
}

impl RedisTicketStore {
    /// Connect to Redis with plain (unencrypted) encoding.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns error if connection to Redis fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| TicketError::Storage(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            TicketError::Storage(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("RedisTicketStore initialized");

        Ok(Self {
            conn_manager,
            codec: TicketCodec::plain(),
        })
    }

    /// Use `codec` for payloads and keys (e.g. to encrypt at rest).
    #[must_use]
    pub fn with_codec(mut self, codec: TicketCodec) -> Self {
        self.codec = codec;
        self
    }

    fn ticket_key(&self, id: &TicketId) -> String {
        format!("{KEY_PREFIX}{}", self.codec.storage_id(id))
    }

    /// Conditional `SET` with optional `PX` expiry.
    async fn set(&self, ticket: &Ticket, ttl: Option<Duration>, condition: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let key = self.ticket_key(ticket.id());
        let bytes = self.codec.encode(ticket)?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(bytes).arg(condition);
        if let Some(ttl) = ttl {
            // PX 0 is rejected by Redis; an exhausted ticket lingers 1 ms.
            #[allow(clippy::cast_possible_truncation)]
            let millis = ttl.as_millis().max(1) as u64;
            cmd.arg("PX").arg(millis);
        }

        let reply: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| TicketError::Storage(format!("Failed to store ticket: {e}")))?;
        Ok(reply.is_some())
    }

    async fn fetch(conn: &mut ConnectionManager, key: &str) -> Result<Option<Vec<u8>>> {
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| TicketError::Storage(format!("Failed to load ticket: {e}")))
    }
}

impl std::fmt::Debug for RedisTicketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTicketStore")
            .field("encrypted", &self.codec.is_encrypted())
            .finish_non_exhaustive()
    }
}

impl TicketStore for RedisTicketStore {
    async fn open(&self) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| TicketError::Storage(format!("Redis is unreachable: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // The connection manager closes its connection when the last clone drops.
        Ok(())
    }

    async fn insert(&self, ticket: &Ticket, ttl: Option<Duration>) -> Result<bool> {
        self.set(ticket, ttl, "NX").await
    }

    async fn replace(&self, ticket: &Ticket, ttl: Option<Duration>) -> Result<bool> {
        self.set(ticket, ttl, "XX").await
    }

    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let mut conn = self.conn_manager.clone();
        Self::fetch(&mut conn, &self.ticket_key(id))
            .await?
            .map(|bytes| self.codec.decode(&bytes))
            .transpose()
    }

    async fn take(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let mut conn = self.conn_manager.clone();

        // GETDEL is atomic: of concurrent callers exactly one receives the value.
        let bytes: Option<Vec<u8>> = conn
            .get_del(self.ticket_key(id))
            .await
            .map_err(|e| TicketError::Storage(format!("Failed to consume ticket: {e}")))?;

        bytes.map(|bytes| self.codec.decode(&bytes)).transpose()
    }

    async fn delete(&self, id: &TicketId) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: usize = conn
            .del(self.ticket_key(id))
            .await
            .map_err(|e| TicketError::Storage(format!("Failed to delete ticket: {e}")))?;
        Ok(removed > 0)
    }

    fn scan(&self) -> BoxStream<'_, Result<Ticket>> {
        let mut conn = self.conn_manager.clone();
        let pattern = format!("{KEY_PREFIX}*");

        async_stream::try_stream! {
            let mut cursor: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| TicketError::Storage(format!("Failed to scan tickets: {e}")))?;

                for key in keys {
                    // Deleted between SCAN and GET.
                    let Some(bytes) = Self::fetch(&mut conn, &key).await? else {
                        continue;
                    };
                    yield self.codec.decode(&bytes)?;
                }

                if next == 0 {
                    break;
                }
                cursor = next;
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::{Authentication, Principal};
    use crate::cipher::TicketCipher;
    use crate::expiration::ExpirationPolicy;
    use futures::TryStreamExt;
    use sso_testing::test_epoch;

    fn ticket(id: &str) -> Ticket {
        Ticket::ticket_granting(
            TicketId::new(id),
            Authentication::new(Principal::new("casuser"), test_epoch()),
            ExpirationPolicy::NeverExpires,
            test_epoch(),
        )
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_insert_get_take() {
        let store = RedisTicketStore::new("redis://127.0.0.1:6379").await.unwrap();
        let id = TicketId::new("TGT-redis-insert-get-take");
        store.delete(&id).await.unwrap();

        assert!(store.insert(&ticket(id.as_str()), Some(Duration::from_secs(30))).await.unwrap());
        assert!(!store.insert(&ticket(id.as_str()), None).await.unwrap());
        assert_eq!(store.get(&id).await.unwrap(), Some(ticket(id.as_str())));
        assert!(store.take(&id).await.unwrap().is_some());
        assert!(store.take(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_atomic_take() {
        let store = RedisTicketStore::new("redis://127.0.0.1:6379").await.unwrap();
        let id = TicketId::new("ST-redis-concurrent");
        store.delete(&id).await.unwrap();
        store.insert(&ticket(id.as_str()), None).await.unwrap();

        let mut handles = vec![];
        for _ in 0..10 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move { store.take(&id).await.unwrap() }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1, "Exactly one take should succeed due to GETDEL atomicity");
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_encrypted_store_round_trip() {
        let store = RedisTicketStore::new("redis://127.0.0.1:6379")
            .await
            .unwrap()
            .with_codec(TicketCodec::encrypted(TicketCipher::new(&[9_u8; 32]).unwrap()));
        let id = TicketId::new("TGT-redis-encrypted");
        store.delete(&id).await.unwrap();

        store.insert(&ticket(id.as_str()), None).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(ticket(id.as_str())));

        let scanned: Vec<Ticket> = store.scan().try_collect().await.unwrap();
        assert!(scanned.iter().any(|t| t.id() == &id));
        store.delete(&id).await.unwrap();
    }
}
