//! Fault-injecting ticket store for testing.

use crate::error::{Result, TicketError};
use crate::providers::TicketStore;
use crate::stores::InMemoryTicketStore;
use crate::ticket::{Ticket, TicketId};
use futures::stream::BoxStream;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    delay: Option<Duration>,
    failing_deletes: HashSet<TicketId>,
}

/// Wraps an [`InMemoryTicketStore`] and injects latency or failures.
///
/// Clones share both the tickets and the fault settings.
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Debug, Clone, Default)]
pub struct FaultyTicketStore {
    inner: InMemoryTicketStore,
    faults: Arc<Mutex<Faults>>,
}

impl FaultyTicketStore {
    /// Create a store with no faults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store, for inspection.
    #[must_use]
    pub const fn inner(&self) -> &InMemoryTicketStore {
        &self.inner
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay every subsequent operation by `delay`. `None` removes the delay.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.faults().delay = delay;
    }

    /// Make deletion of `id` fail with a storage error.
    pub fn fail_delete_of(&self, id: impl Into<TicketId>) {
        self.faults().failing_deletes.insert(id.into());
    }

    async fn stall(&self) {
        let delay = self.faults().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl TicketStore for FaultyTicketStore {
    async fn open(&self) -> Result<()> {
        self.stall().await;
        self.inner.open().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    async fn insert(&self, ticket: &Ticket, ttl: Option<Duration>) -> Result<bool> {
        self.stall().await;
        self.inner.insert(ticket, ttl).await
    }

    async fn replace(&self, ticket: &Ticket, ttl: Option<Duration>) -> Result<bool> {
        self.stall().await;
        self.inner.replace(ticket, ttl).await
    }

    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>> {
        self.stall().await;
        self.inner.get(id).await
    }

    async fn take(&self, id: &TicketId) -> Result<Option<Ticket>> {
        self.stall().await;
        self.inner.take(id).await
    }

    async fn delete(&self, id: &TicketId) -> Result<bool> {
        self.stall().await;
        if self.faults().failing_deletes.contains(id) {
            return Err(TicketError::Storage(format!("injected failure deleting {id}")));
        }
        self.inner.delete(id).await
    }

    fn scan(&self) -> BoxStream<'_, Result<Ticket>> {
        self.inner.scan()
    }
}
