//! In-memory ticket store.

use crate::error::Result;
use crate::providers::TicketStore;
use crate::ticket::{Ticket, TicketId};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Ticket store backed by a mutex-protected map.
///
/// TTL hints are ignored: expired tickets stay until the registry purges
/// them on read or the cleaner sweeps them. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTicketStore {
    tickets: Arc<Mutex<HashMap<TicketId, Ticket>>>,
}

impl InMemoryTicketStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<TicketId, Ticket>> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored tickets, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// Whether the store holds no tickets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Whether a ticket with `id` is stored.
    #[must_use]
    pub fn contains(&self, id: &TicketId) -> bool {
        self.map().contains_key(id)
    }

    /// Remove every ticket.
    pub fn clear(&self) {
        self.map().clear();
    }
}

impl TicketStore for InMemoryTicketStore {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn insert(&self, ticket: &Ticket, _ttl: Option<Duration>) -> Result<bool> {
        match self.map().entry(ticket.id().clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(ticket.clone());
                Ok(true)
            }
        }
    }

    async fn replace(&self, ticket: &Ticket, _ttl: Option<Duration>) -> Result<bool> {
        let mut map = self.map();
        let Some(stored) = map.get_mut(ticket.id()) else {
            return Ok(false);
        };
        *stored = ticket.clone();
        Ok(true)
    }

    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>> {
        Ok(self.map().get(id).cloned())
    }

    async fn take(&self, id: &TicketId) -> Result<Option<Ticket>> {
        // Removal under the map lock is the atomic get-and-delete.
        Ok(self.map().remove(id))
    }

    async fn delete(&self, id: &TicketId) -> Result<bool> {
        Ok(self.map().remove(id).is_some())
    }

    fn scan(&self) -> BoxStream<'_, Result<Ticket>> {
        let snapshot: Vec<Ticket> = self.map().values().cloned().collect();
        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::{Authentication, Principal};
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
    async fn test_insert_does_not_overwrite() {
        let store = InMemoryTicketStore::new();
        assert!(store.insert(&ticket("TGT-1"), None).await.unwrap());
        assert!(!store.insert(&ticket("TGT-1"), None).await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_requires_existing() {
        let store = InMemoryTicketStore::new();
        assert!(!store.replace(&ticket("TGT-1"), None).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_take_is_single_shot() {
        let store = InMemoryTicketStore::new();
        store.insert(&ticket("ST-1"), None).await.unwrap();

        let id = TicketId::new("ST-1");
        assert!(store.take(&id).await.unwrap().is_some());
        assert!(store.take(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_returns_all() {
        let store = InMemoryTicketStore::new();
        for id in ["TGT-1", "TGT-2", "TGT-3"] {
            store.insert(&ticket(id), None).await.unwrap();
        }
        let all: Vec<Ticket> = store.scan().try_collect().await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
