//! Ticket registry.
//!
//! The registry is the authoritative owner of every live ticket. It sits on
//! top of a [`TicketStore`] (where tickets live) and a [`LockRepository`]
//! (how read-modify-write sequences on one ticket serialize), and enforces
//! the lifecycle rules the store knows nothing about:
//!
//! - ids are unique: adding an existing id fails, it never overwrites
//! - an expired ticket is never returned; it is purged (with its descendants)
//!   on the read that notices it
//! - single-use tickets are consumed atomically, so of N concurrent
//!   validations exactly one succeeds
//! - deleting a granting ticket deletes everything it granted, recursively
//! - every store call is bounded by the configured operation timeout
//!
//! Mutations are explicit: changing a ticket obtained from the registry has no
//! effect until it is written back with [`TicketRegistry::update_ticket`] (or
//! the change is made through [`TicketRegistry::mutate_ticket`]).

use crate::authentication::Authentication;
use crate::config::RegistryConfig;
use crate::error::{Result, TicketError};
use crate::lock::LockRepository;
use crate::metrics as names;
use crate::providers::TicketStore;
use crate::ticket::{Ticket, TicketId, TicketKind};
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use metrics::{counter, histogram};
use sso_core::environment::SharedClock;
use std::future::Future;
use std::time::Instant;

/// Result of a cascading delete.
#[derive(Debug, Clone, Default)]
pub struct DeletionReport {
    /// Number of tickets removed, root included.
    pub deleted: usize,

    /// Descendants that could not be removed, with the reason.
    pub failures: Vec<(TicketId, TicketError)>,
}

impl DeletionReport {
    /// Whether every descendant was removed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ticket registry over a store `S` and lock repository `L`.
pub struct TicketRegistry<S, L> {
    store: S,
    locks: L,
    clock: SharedClock,
    config: RegistryConfig,
}

impl<S, L> std::fmt::Debug for TicketRegistry<S, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: TicketStore, L: LockRepository> TicketRegistry<S, L> {
    /// Wire a registry from its collaborators.
    #[must_use]
    pub fn new(store: S, locks: L, clock: SharedClock, config: RegistryConfig) -> Self {
        Self {
            store,
            locks,
            clock,
            config,
        }
    }

    /// Backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Lock repository.
    #[must_use]
    pub const fn locks(&self) -> &L {
        &self.locks
    }

    /// Current instant according to the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ═══════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════

    /// Open the backing store.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened in time.
    pub async fn open(&self) -> Result<()> {
        self.timed("open", self.store.open()).await?;
        tracing::info!("Ticket registry opened");
        Ok(())
    }

    /// Close the backing store.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be closed in time.
    pub async fn close(&self) -> Result<()> {
        self.timed("close", self.store.close()).await?;
        tracing::info!("Ticket registry closed");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════
    // Basic operations
    // ═══════════════════════════════════════════════════════════

    /// Add a new ticket.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketAlreadyExists`] if the id is taken
    /// - storage errors
    pub async fn add_ticket(&self, ticket: &Ticket) -> Result<()> {
        let ttl = ticket.ttl_hint(self.now());
        if !self.timed("insert", self.store.insert(ticket, ttl)).await? {
            tracing::error!(
                ticket_id = %ticket.id(),
                "Ticket id collision; generator misconfigured or id forged"
            );
            return Err(TicketError::TicketAlreadyExists {
                id: ticket.id().to_string(),
            });
        }

        counter!(names::TICKETS_CREATED_TOTAL, "kind" => ticket.kind().name()).increment(1);
        tracing::debug!(
            ticket_id = %ticket.id(),
            kind = %ticket.kind(),
            policy = ticket.expiration_policy().name(),
            "Ticket added"
        );
        Ok(())
    }

    /// Fetch a live ticket of the expected kind.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketNotFound`] if absent or expired (an expired
    ///   ticket is purged on the spot)
    /// - [`TicketError::InvalidTicketClass`] if the stored kind differs
    pub async fn get_ticket(&self, id: &TicketId, kind: TicketKind) -> Result<Ticket> {
        let ticket = self.find_ticket(id).await?;
        if ticket.kind() != kind {
            tracing::warn!(
                ticket_id = %id,
                expected = %kind,
                actual = %ticket.kind(),
                "Ticket kind mismatch"
            );
            return Err(TicketError::InvalidTicketClass {
                id: id.to_string(),
                expected: kind.name().to_string(),
                actual: ticket.kind().name().to_string(),
            });
        }
        Ok(ticket)
    }

    /// Fetch a live ticket of any kind.
    ///
    /// A ticket is only live while every granting ticket above it is. When an
    /// ancestor has expired, the outermost expired one is purged with its
    /// whole subtree.
    ///
    /// # Errors
    ///
    /// [`TicketError::TicketNotFound`] if absent, expired or orphaned by an
    /// expired ancestor.
    pub async fn find_ticket(&self, id: &TicketId) -> Result<Ticket> {
        let Some(mut ticket) = self.timed("get", self.store.get(id)).await? else {
            return Err(TicketError::not_found(id));
        };

        let now = self.now();
        if ticket.check_expired(now) {
            tracing::debug!(ticket_id = %id, kind = %ticket.kind(), "Ticket expired; purging");
            counter!(names::TICKETS_EXPIRED_TOTAL).increment(1);
            if let Err(error) = self.delete_ticket(id).await {
                tracing::warn!(ticket_id = %id, error = %error, "Failed to purge expired ticket");
            }
            return Err(TicketError::not_found(id));
        }

        if let Some(ancestor_id) = self.expired_ancestor(&ticket, now).await? {
            tracing::debug!(
                ticket_id = %id,
                ancestor_id = %ancestor_id,
                "Granting ancestor expired; purging session"
            );
            counter!(names::TICKETS_EXPIRED_TOTAL).increment(1);
            for purge in [&ancestor_id, id] {
                if let Err(error) = self.delete_ticket(purge).await {
                    tracing::warn!(ticket_id = %purge, error = %error, "Failed to purge expired ticket");
                }
            }
            return Err(TicketError::not_found(id));
        }

        Ok(ticket)
    }

    /// Outermost expired ticket on the parent chain above `ticket`.
    ///
    /// A link to a ticket that no longer exists ends the walk.
    async fn expired_ancestor(&self, ticket: &Ticket, now: DateTime<Utc>) -> Result<Option<TicketId>> {
        let mut expired = None;
        let mut next = ticket.parent_id().cloned();
        while let Some(current) = next.take() {
            let Some(ancestor) = self.load_ticket(&current).await? else {
                break;
            };
            if ancestor.is_expired(now) {
                expired = Some(current);
            }
            next = ancestor.parent_id().cloned();
        }
        Ok(expired)
    }

    /// Root of the delegation chain above `id`, if it is still stored.
    async fn root_of(&self, id: &TicketId) -> Result<Option<TicketId>> {
        let mut root = None;
        let mut next = Some(id.clone());
        while let Some(current) = next.take() {
            let Some(ticket) = self.load_ticket(&current).await? else {
                break;
            };
            next = ticket.parent_id().cloned();
            root = Some(current);
        }
        Ok(root)
    }

    /// Fetch a stored ticket as-is, expired or not, without purging it.
    ///
    /// For maintenance paths (logout of expired sessions, descendant walks)
    /// that must see tickets regular lookups would hide.
    ///
    /// # Errors
    ///
    /// Returns error if the store call fails.
    pub async fn load_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        self.timed("get", self.store.get(id)).await
    }

    /// Authentications along the delegation chain ending at `id`, root first.
    ///
    /// Follows parent links through delegated and proxy-granting tickets; a
    /// link to a ticket that no longer exists ends the walk.
    ///
    /// # Errors
    ///
    /// Returns error if a store call fails.
    pub async fn chained_authentications(&self, id: &TicketId) -> Result<Vec<Authentication>> {
        let mut chain = Vec::new();
        let mut next = Some(id.clone());
        while let Some(current) = next.take() {
            let Some(ticket) = self.load_ticket(&current).await? else {
                break;
            };
            if let Some(authentication) = ticket.authentication() {
                chain.push(authentication.clone());
            }
            next = ticket.parent_id().cloned();
        }
        chain.reverse();
        Ok(chain)
    }

    /// Write back a modified ticket.
    ///
    /// # Errors
    ///
    /// [`TicketError::TicketNotFound`] if the ticket no longer exists.
    pub async fn update_ticket(&self, ticket: &Ticket) -> Result<()> {
        let ttl = ticket.ttl_hint(self.now());
        if !self.timed("replace", self.store.replace(ticket, ttl)).await? {
            return Err(TicketError::not_found(ticket.id()));
        }
        tracing::debug!(
            ticket_id = %ticket.id(),
            count_of_uses = ticket.count_of_uses(),
            "Ticket updated"
        );
        Ok(())
    }

    /// Delete a ticket and, recursively, everything it granted.
    ///
    /// A missing root is not an error and reports zero deletions. Failures on
    /// descendants are collected in the report; the root is deleted anyway.
    ///
    /// # Errors
    ///
    /// Returns error only if the root itself could not be read or deleted.
    pub async fn delete_ticket(&self, id: &TicketId) -> Result<DeletionReport> {
        let mut report = DeletionReport::default();
        let Some(ticket) = self.timed("get", self.store.get(id)).await? else {
            return Ok(report);
        };

        self.delete_descendants(&ticket, &mut report).await;

        if self.timed("delete", self.store.delete(id)).await? {
            report.deleted += 1;
            counter!(names::TICKETS_DELETED_TOTAL, "kind" => ticket.kind().name()).increment(1);
        }

        if report.is_complete() {
            tracing::debug!(ticket_id = %id, deleted = report.deleted, "Ticket deleted");
        } else {
            tracing::warn!(
                ticket_id = %id,
                deleted = report.deleted,
                failures = report.failures.len(),
                "Ticket deleted; some descendants could not be removed"
            );
        }
        Ok(report)
    }

    fn delete_descendants<'a>(
        &'a self,
        ticket: &'a Ticket,
        report: &'a mut DeletionReport,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            for child_id in ticket.child_ids() {
                let child = match self.timed("get", self.store.get(&child_id)).await {
                    Ok(Some(child)) => child,
                    // Already consumed or evicted.
                    Ok(None) => continue,
                    Err(error) => {
                        report.failures.push((child_id, error));
                        continue;
                    }
                };

                self.delete_descendants(&child, report).await;

                match self.timed("delete", self.store.delete(&child_id)).await {
                    Ok(true) => {
                        report.deleted += 1;
                        counter!(names::TICKETS_DELETED_TOTAL, "kind" => child.kind().name())
                            .increment(1);
                    }
                    Ok(false) => {}
                    Err(error) => report.failures.push((child_id, error)),
                }
            }
        })
    }

    /// Stream every stored ticket matching `predicate`.
    ///
    /// Walks the whole store: expensive, meant for maintenance tasks. Expired
    /// tickets are included so callers can find them.
    pub fn get_tickets<'a, P>(&'a self, predicate: P) -> BoxStream<'a, Result<Ticket>>
    where
        P: Fn(&Ticket) -> bool + Send + 'a,
    {
        self.store
            .scan()
            .try_filter(move |ticket| future::ready(predicate(ticket)))
            .boxed()
    }

    // ═══════════════════════════════════════════════════════════
    // Locked operations
    // ═══════════════════════════════════════════════════════════

    /// Read, modify and write back a live ticket under its lock.
    ///
    /// # Errors
    ///
    /// - [`TicketError::LockTimeout`] if the lock could not be acquired
    /// - lookup errors from [`Self::get_ticket`]
    /// - any error returned by `mutate` (nothing is written in that case)
    pub async fn mutate_ticket<T, F>(&self, id: &TicketId, kind: TicketKind, mutate: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut Ticket, DateTime<Utc>) -> Result<T> + Send,
    {
        self.locked(id, async {
            let mut ticket = self.get_ticket(id, kind).await?;
            let value = mutate(&mut ticket, self.now())?;
            self.update_ticket(&ticket).await?;
            Ok(value)
        })
        .await
    }

    /// Consume a ticket on validation.
    ///
    /// Records the use. A single-use ticket is removed with the store's
    /// atomic `take`; a reusable one is written back, or removed once this
    /// use exhausted its policy.
    ///
    /// # Returns
    ///
    /// The ticket as it was used (use count already incremented).
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketNotFound`] if absent, expired or consumed by a
    ///   concurrent caller
    /// - [`TicketError::InvalidTicketClass`] on kind mismatch
    /// - [`TicketError::LockTimeout`]
    pub async fn consume_ticket(&self, id: &TicketId, kind: TicketKind) -> Result<Ticket> {
        self.locked(id, async {
            let mut ticket = self.get_ticket(id, kind).await?;
            let now = self.now();
            ticket.update_state(now);

            if ticket.is_single_use() {
                if self.timed("take", self.store.take(id)).await?.is_none() {
                    return Err(TicketError::not_found(id));
                }
                counter!(names::TICKETS_CONSUMED_TOTAL, "kind" => kind.name()).increment(1);
                tracing::debug!(ticket_id = %id, "Single-use ticket consumed");
            } else if ticket.check_expired(now) {
                self.timed("delete", self.store.delete(id)).await?;
                tracing::debug!(ticket_id = %id, "Reusable ticket used up");
            } else {
                self.update_ticket(&ticket).await?;
            }

            Ok(ticket)
        })
        .await
    }

    /// Grant a child ticket from a live granting ticket.
    ///
    /// Runs inside the parent's critical section:
    ///
    /// 1. the parent must exist and be live, else [`TicketError::TicketCreation`]
    /// 2. a throttled parent refuses the grant
    /// 3. `grant` mutates the parent (use state, child tracking) and returns the child
    /// 4. the child is added, then the parent written back
    ///
    /// If the parent cannot be written back the child is removed again.
    ///
    /// When the parent is itself delegated (a proxy-granting ticket), the
    /// session's root ticket-granting ticket is then refreshed
    /// so its idle timeout restarts. That refresh runs outside the parent's
    /// lock and only logs on failure.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketCreation`] if the parent is missing, expired or throttled
    /// - [`TicketError::InvalidTicketClass`] if the parent has another kind
    /// - [`TicketError::LockTimeout`], storage errors, errors from `grant`
    pub async fn grant_child<F>(
        &self,
        parent_id: &TicketId,
        parent_kind: TicketKind,
        grant: F,
    ) -> Result<Ticket>
    where
        F: FnOnce(&mut Ticket, DateTime<Utc>) -> Result<Ticket> + Send,
    {
        let (child, grandparent_id) = self.locked(parent_id, async {
            let mut parent = match self.get_ticket(parent_id, parent_kind).await {
                Ok(parent) => parent,
                Err(TicketError::TicketNotFound { .. }) => {
                    return Err(TicketError::creation(format!(
                        "granting ticket {parent_id} is missing or expired"
                    )));
                }
                Err(error) => return Err(error),
            };

            let now = self.now();
            if parent
                .expiration_policy()
                .is_throttled(&parent.expiration_state(), now)
            {
                tracing::warn!(ticket_id = %parent_id, "Grant refused: granting ticket throttled");
                return Err(TicketError::creation(format!(
                    "granting ticket {parent_id} used too frequently"
                )));
            }

            let child = grant(&mut parent, now)?;
            self.add_ticket(&child).await?;

            if let Err(error) = self.update_ticket(&parent).await {
                if let Err(rollback) = self.timed("delete", self.store.delete(child.id())).await {
                    tracing::warn!(
                        ticket_id = %child.id(),
                        error = %rollback,
                        "Failed to roll back child of failed grant"
                    );
                }
                return Err(error);
            }

            tracing::info!(
                parent_id = %parent_id,
                ticket_id = %child.id(),
                kind = %child.kind(),
                "Ticket granted"
            );
            Ok((child, parent.parent_id().cloned()))
        })
        .await?;

        if let Some(grandparent_id) = grandparent_id {
            self.refresh_root(&grandparent_id).await;
        }
        Ok(child)
    }

    async fn refresh_root(&self, from: &TicketId) {
        let refreshed = match self.root_of(from).await {
            Ok(Some(root_id)) => {
                let touched = self
                    .mutate_ticket(&root_id, TicketKind::TicketGranting, |root, now| {
                        root.update_state(now);
                        Ok(())
                    })
                    .await;
                touched.map(|()| root_id)
            }
            Ok(None) => return,
            Err(error) => Err(error),
        };
        match refreshed {
            Ok(root_id) => tracing::debug!(ticket_id = %root_id, "Session refreshed by delegated grant"),
            Err(error) => {
                tracing::warn!(ticket_id = %from, error = %error, "Failed to refresh session root");
            }
        }
    }

    // ═══════════════════════════════════════════════════════════
    // Statistics and maintenance
    // ═══════════════════════════════════════════════════════════

    /// Number of live tickets of `kind`.
    ///
    /// # Errors
    ///
    /// Returns error if the scan fails.
    pub async fn count(&self, kind: TicketKind) -> Result<usize> {
        let now = self.now();
        self.get_tickets(move |ticket| ticket.kind() == kind && !ticket.is_expired(now))
            .try_fold(0_usize, |count, _| future::ready(Ok(count + 1)))
            .await
    }

    /// Number of live SSO sessions (ticket-granting tickets).
    ///
    /// # Errors
    ///
    /// Returns error if the scan fails.
    pub async fn session_count(&self) -> Result<usize> {
        self.count(TicketKind::TicketGranting).await
    }

    /// Number of live service tickets.
    ///
    /// # Errors
    ///
    /// Returns error if the scan fails.
    pub async fn service_ticket_count(&self) -> Result<usize> {
        self.count(TicketKind::Service).await
    }

    /// Every stored ticket that is expired now.
    ///
    /// # Errors
    ///
    /// Returns error if the scan fails.
    pub async fn expired_tickets(&self) -> Result<Vec<Ticket>> {
        let now = self.now();
        self.get_tickets(move |ticket| ticket.is_expired(now))
            .try_collect()
            .await
    }

    /// Delete every expired ticket (with cascade).
    ///
    /// No logout is performed; see [`crate::cleaner::RegistryCleaner`] for
    /// the variant that notifies services of expired sessions.
    ///
    /// # Returns
    ///
    /// Number of tickets removed.
    ///
    /// # Errors
    ///
    /// Returns error if the scan fails. Individual delete failures are logged
    /// and skipped.
    pub async fn clean_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for ticket in self.expired_tickets().await? {
            match self.delete_ticket(ticket.id()).await {
                Ok(report) => removed += report.deleted,
                Err(error) => {
                    tracing::warn!(ticket_id = %ticket.id(), error = %error, "Failed to remove expired ticket");
                }
            }
        }
        Ok(removed)
    }

    /// Delete every stored ticket, live or expired.
    ///
    /// # Returns
    ///
    /// Number of tickets removed.
    ///
    /// # Errors
    ///
    /// Returns error if the scan or a delete fails. Tickets deleted before
    /// the failure stay deleted.
    pub async fn delete_all(&self) -> Result<usize> {
        let ids: Vec<TicketId> = self
            .store
            .scan()
            .map_ok(|ticket| ticket.id().clone())
            .try_collect()
            .await?;

        let mut removed = 0;
        for id in &ids {
            if self.timed("delete", self.store.delete(id)).await? {
                removed += 1;
            }
        }

        counter!(names::TICKETS_DELETED_TOTAL, "kind" => "all").increment(removed as u64);
        tracing::info!(deleted = removed, "Registry cleared");
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════

    async fn locked<T, Fut>(&self, id: &TicketId, section: Fut) -> Result<T>
    where
        T: Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.locks
            .execute(id.as_str(), || section)
            .await
            .unwrap_or_else(|| {
                Err(TicketError::LockTimeout {
                    key: id.to_string(),
                })
            })
    }

    async fn timed<T, Fut>(&self, operation: &'static str, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.config.operation_timeout, call).await;
        histogram!(names::STORAGE_DURATION_SECONDS, "operation" => operation)
            .record(start.elapsed().as_secs_f64());

        outcome.unwrap_or_else(|_| {
            tracing::warn!(
                operation,
                timeout_ms = self.config.operation_timeout.as_millis(),
                "Ticket store call timed out"
            );
            counter!(names::STORAGE_TIMEOUTS_TOTAL, "operation" => operation).increment(1);
            Err(TicketError::StorageTimeout { operation })
        })
    }
}
