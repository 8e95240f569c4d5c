//! Ticket store trait.
//!
//! A store is a dumb keyed container of serialized tickets. Expiry decisions,
//! cascade deletion and locking all live in the registry; the store only has
//! to provide the atomic primitives the registry builds on.

use crate::error::Result;
use crate::ticket::{Ticket, TicketId};
use futures::stream::BoxStream;
use std::future::Future;
use std::time::Duration;

/// Backing store for tickets.
///
/// # Implementation Notes
///
/// - `ttl` arguments are eviction hints only; the registry re-checks expiry on
///   every read, so a store may keep tickets longer (or ignore the hint).
/// - **CRITICAL**: `take()` MUST be atomic (Redis `GETDEL`, or a single
///   critical section in memory). Single-use consumption relies on it.
/// - `insert()` MUST fail on an existing key rather than overwrite it.
pub trait TicketStore: Send + Sync {
    /// Prepare the store (connect, create structures).
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unreachable.
    fn open(&self) -> impl Future<Output = Result<()>> + Send;

    /// Release backend resources.
    ///
    /// # Errors
    ///
    /// Returns error if the backend could not be shut down cleanly.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;

    /// Store a new ticket.
    ///
    /// # Returns
    ///
    /// `false` if a ticket with the same id already exists (nothing written).
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn insert(
        &self,
        ticket: &Ticket,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Overwrite an existing ticket.
    ///
    /// # Returns
    ///
    /// `false` if no ticket with that id exists (nothing written).
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn replace(
        &self,
        ticket: &Ticket,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Fetch a ticket.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation or decoding fails.
    fn get(&self, id: &TicketId) -> impl Future<Output = Result<Option<Ticket>>> + Send;

    /// Fetch and remove a ticket in one atomic step.
    ///
    /// Of several concurrent callers for the same id, at most one gets `Some`.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation or decoding fails.
    fn take(&self, id: &TicketId) -> impl Future<Output = Result<Option<Ticket>>> + Send;

    /// Remove a ticket.
    ///
    /// # Returns
    ///
    /// `true` if a ticket was removed.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn delete(&self, id: &TicketId) -> impl Future<Output = Result<bool>> + Send;

    /// Stream every stored ticket.
    ///
    /// Potentially expensive: walks the whole keyspace.
    fn scan(&self) -> BoxStream<'_, Result<Ticket>>;
}
