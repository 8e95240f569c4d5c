//! Ticket model.
//!
//! Every ticket shares one envelope ([`Ticket`]) holding the lifecycle
//! metadata the expiration policies look at, plus a closed set of
//! kind-specific payloads ([`TicketBody`]):
//!
//! ```text
//! TicketGranting (TGT-) ──grants──▶ Service (ST-)
//!        │                              │ validated with pgtUrl
//!        └──────────owns──────▶ ProxyGranting (PGT-) ──grants──▶ Proxy (PT-)
//! ```
//!
//! A granting ticket owns the lifecycle of everything it granted: deleting
//! or expiring it cascades to all descendants (see
//! [`TicketRegistry::delete_ticket`](crate::registry::TicketRegistry::delete_ticket)).
//! Children only keep the id of their granting ticket; the registry is the
//! authoritative owner of the objects themselves.

use crate::authentication::Authentication;
use crate::constants::prefixes;
use crate::error::{Result, TicketError};
use crate::expiration::{ExpirationPolicy, ExpirationState};
use crate::service::Service;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

/// Unique, prefixed ticket identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketId(String);

impl TicketId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix before the first `-`.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }

    /// Ticket kind implied by the prefix, if it names a stored kind.
    #[must_use]
    pub fn kind(&self) -> Option<TicketKind> {
        TicketKind::from_prefix(self.prefix())
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TicketId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TicketId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for TicketId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Kinds of tickets the registry stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketKind {
    /// Root of an SSO session.
    TicketGranting,
    /// Single-use proof for one relying service.
    Service,
    /// Long-lived ticket a service uses to mint proxy tickets.
    ProxyGranting,
    /// Service ticket minted from a proxy-granting ticket.
    Proxy,
}

impl TicketKind {
    /// Id prefix for this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::TicketGranting => prefixes::TICKET_GRANTING_TICKET,
            Self::Service => prefixes::SERVICE_TICKET,
            Self::ProxyGranting => prefixes::PROXY_GRANTING_TICKET,
            Self::Proxy => prefixes::PROXY_TICKET,
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TicketGranting => "ticket-granting",
            Self::Service => "service",
            Self::ProxyGranting => "proxy-granting",
            Self::Proxy => "proxy",
        }
    }

    /// Parse a prefix. `PGTIOU` is not a stored kind and yields `None`.
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            prefixes::TICKET_GRANTING_TICKET => Some(Self::TicketGranting),
            prefixes::SERVICE_TICKET => Some(Self::Service),
            prefixes::PROXY_GRANTING_TICKET => Some(Self::ProxyGranting),
            prefixes::PROXY_TICKET => Some(Self::Proxy),
            _ => None,
        }
    }

    /// Whether tickets of this kind grant children.
    #[must_use]
    pub const fn is_granting(self) -> bool {
        matches!(self, Self::TicketGranting | Self::ProxyGranting)
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Kind-specific payloads
// ═══════════════════════════════════════════════════════════════════════

/// Payload of ticket-granting and proxy-granting tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantingTicket {
    /// Authentication this session is built on.
    pub authentication: Authentication,

    /// Granting ticket this one was delegated from (proxy authentication).
    pub parent_id: Option<TicketId>,

    /// Service that received this ticket through a proxy callback.
    pub proxied_by: Option<Service>,

    /// Service and proxy tickets tracked for single logout.
    pub services: BTreeMap<TicketId, TrackedService>,

    /// Proxy-granting tickets delegated from this ticket.
    pub proxy_granting_tickets: BTreeMap<TicketId, Service>,

    /// Every ticket ever granted directly by this one (cascade set).
    pub descendant_tickets: BTreeSet<TicketId>,
}

impl GrantingTicket {
    fn new(
        authentication: Authentication,
        parent_id: Option<TicketId>,
        proxied_by: Option<Service>,
    ) -> Self {
        Self {
            authentication,
            parent_id,
            proxied_by,
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
            descendant_tickets: BTreeSet::new(),
        }
    }

    /// Whether this is the root of its chain.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Record a granted service/proxy ticket for `service`.
    ///
    /// With `only_track_most_recent_session`, an older ticket for the same
    /// normalized service stops being tracked for logout (it still belongs to
    /// the cascade set).
    fn track_service(
        &mut self,
        id: TicketId,
        service: Service,
        granted_at: DateTime<Utc>,
        sequence: u32,
        only_track_most_recent_session: bool,
    ) {
        if only_track_most_recent_session {
            self.services.retain(|_, tracked| !tracked.service.matches(&service));
        }
        self.descendant_tickets.insert(id.clone());
        self.services.insert(
            id,
            TrackedService {
                service,
                granted_at,
                sequence,
            },
        );
    }
}

/// A service or proxy ticket a granting ticket tracks for single logout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedService {
    /// Service the ticket was issued for.
    pub service: Service,

    /// Grant instant.
    pub granted_at: DateTime<Utc>,

    /// Use count of the granting ticket right after the grant; orders grants
    /// made within the same instant.
    pub sequence: u32,
}

/// Payload of a service ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicket {
    /// Granting ticket that issued this one.
    pub granting_ticket_id: TicketId,

    /// Service the ticket is scoped to.
    pub service: Service,

    /// `true` when issued right after credential entry rather than via SSO.
    pub from_new_login: bool,

    /// Explicit opt-in: the ticket survives validation until its policy expires it.
    pub reusable: bool,

    /// Proxy-granting ticket delegated on the strength of this ticket. At
    /// most one.
    #[serde(default)]
    pub proxy_granting_ticket: Option<TicketId>,
}

/// Payload of a proxy ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyTicket {
    /// Proxy-granting ticket that issued this one.
    pub granting_ticket_id: TicketId,

    /// Target service.
    pub service: Service,

    /// Services that vouched for the authentication, most recent first.
    pub proxy_chain: Vec<Service>,

    /// Explicit opt-in: the ticket survives validation until its policy expires it.
    pub reusable: bool,

    /// Proxy-granting ticket delegated on the strength of this ticket. At
    /// most one.
    #[serde(default)]
    pub proxy_granting_ticket: Option<TicketId>,
}

/// Kind-specific ticket payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketBody {
    /// `TGT-`
    TicketGranting(GrantingTicket),
    /// `PGT-`
    ProxyGranting(GrantingTicket),
    /// `ST-`
    Service(ServiceTicket),
    /// `PT-`
    Proxy(ProxyTicket),
}

// ═══════════════════════════════════════════════════════════════════════
// Ticket
// ═══════════════════════════════════════════════════════════════════════

/// A ticket and its lifecycle metadata.
///
/// The expiration policy is fixed at creation; there is no setter. The
/// `expired` flag can only be raised, never cleared, so a ticket that was
/// seen expired stays expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    id: TicketId,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    previous_last_used_at: DateTime<Utc>,
    count_of_uses: u32,
    expiration_policy: ExpirationPolicy,
    expired: bool,
    body: TicketBody,
}

/// Settings applied to a child ticket when a granting ticket issues it.
#[derive(Debug, Clone)]
pub struct ChildTicketSpec {
    /// Expiration policy of the child.
    pub policy: ExpirationPolicy,

    /// Child survives validation until its policy expires it.
    pub reusable: bool,

    /// Stop tracking older tickets for the same service.
    pub only_track_most_recent_session: bool,
}

impl Ticket {
    fn new(id: TicketId, policy: ExpirationPolicy, now: DateTime<Utc>, body: TicketBody) -> Self {
        Self {
            id,
            created_at: now,
            last_used_at: now,
            previous_last_used_at: now,
            count_of_uses: 0,
            expiration_policy: policy,
            expired: false,
            body,
        }
    }

    /// Root ticket-granting ticket for a fresh authentication.
    #[must_use]
    pub fn ticket_granting(
        id: TicketId,
        authentication: Authentication,
        policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            id,
            policy,
            now,
            TicketBody::TicketGranting(GrantingTicket::new(authentication, None, None)),
        )
    }

    // ───────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────

    /// Ticket id.
    #[must_use]
    pub const fn id(&self) -> &TicketId {
        &self.id
    }

    /// Ticket kind.
    #[must_use]
    pub const fn kind(&self) -> TicketKind {
        match &self.body {
            TicketBody::TicketGranting(_) => TicketKind::TicketGranting,
            TicketBody::ProxyGranting(_) => TicketKind::ProxyGranting,
            TicketBody::Service(_) => TicketKind::Service,
            TicketBody::Proxy(_) => TicketKind::Proxy,
        }
    }

    /// Creation instant.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last use instant.
    #[must_use]
    pub const fn last_used_at(&self) -> DateTime<Utc> {
        self.last_used_at
    }

    /// Instant of the use before the last one.
    #[must_use]
    pub const fn previous_last_used_at(&self) -> DateTime<Utc> {
        self.previous_last_used_at
    }

    /// Number of uses.
    #[must_use]
    pub const fn count_of_uses(&self) -> u32 {
        self.count_of_uses
    }

    /// Expiration policy attached at creation.
    #[must_use]
    pub const fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    /// Kind-specific payload.
    #[must_use]
    pub const fn body(&self) -> &TicketBody {
        &self.body
    }

    /// Granting payload for TGTs and PGTs.
    #[must_use]
    pub const fn as_granting(&self) -> Option<&GrantingTicket> {
        match &self.body {
            TicketBody::TicketGranting(g) | TicketBody::ProxyGranting(g) => Some(g),
            _ => None,
        }
    }

    fn as_granting_mut(&mut self) -> Option<&mut GrantingTicket> {
        match &mut self.body {
            TicketBody::TicketGranting(g) | TicketBody::ProxyGranting(g) => Some(g),
            _ => None,
        }
    }

    /// Service ticket payload.
    #[must_use]
    pub const fn as_service_ticket(&self) -> Option<&ServiceTicket> {
        match &self.body {
            TicketBody::Service(st) => Some(st),
            _ => None,
        }
    }

    /// Proxy ticket payload.
    #[must_use]
    pub const fn as_proxy_ticket(&self) -> Option<&ProxyTicket> {
        match &self.body {
            TicketBody::Proxy(pt) => Some(pt),
            _ => None,
        }
    }

    /// Ticket this one descends from: the parent of a TGT/PGT, or the
    /// granting ticket of an ST/PT.
    #[must_use]
    pub const fn parent_id(&self) -> Option<&TicketId> {
        match &self.body {
            TicketBody::TicketGranting(g) | TicketBody::ProxyGranting(g) => g.parent_id.as_ref(),
            TicketBody::Service(st) => Some(&st.granting_ticket_id),
            TicketBody::Proxy(pt) => Some(&pt.granting_ticket_id),
        }
    }

    /// Service an ST/PT is scoped to.
    #[must_use]
    pub const fn service(&self) -> Option<&Service> {
        match &self.body {
            TicketBody::Service(st) => Some(&st.service),
            TicketBody::Proxy(pt) => Some(&pt.service),
            _ => None,
        }
    }

    /// Authentication of a TGT/PGT.
    #[must_use]
    pub fn authentication(&self) -> Option<&Authentication> {
        self.as_granting().map(|g| &g.authentication)
    }

    /// Proxy chain of a PT, empty otherwise.
    #[must_use]
    pub fn proxy_chain(&self) -> &[Service] {
        self.as_proxy_ticket().map_or(&[], |pt| pt.proxy_chain.as_slice())
    }

    /// Direct children this ticket owns (cascade set).
    #[must_use]
    pub fn child_ids(&self) -> Vec<TicketId> {
        self.as_granting().map_or_else(Vec::new, |g| {
            let mut children: BTreeSet<TicketId> = g.descendant_tickets.clone();
            children.extend(g.services.keys().cloned());
            children.extend(g.proxy_granting_tickets.keys().cloned());
            children.into_iter().collect()
        })
    }

    /// Whether validation consumes the ticket.
    #[must_use]
    pub const fn is_single_use(&self) -> bool {
        match &self.body {
            TicketBody::Service(st) => !st.reusable,
            TicketBody::Proxy(pt) => !pt.reusable,
            _ => false,
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Expiration
    // ───────────────────────────────────────────────────────────────

    /// Snapshot handed to the expiration policy.
    #[must_use]
    pub fn expiration_state(&self) -> ExpirationState {
        ExpirationState {
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            previous_last_used_at: self.previous_last_used_at,
            count_of_uses: self.count_of_uses,
            remember_me: self
                .authentication()
                .is_some_and(Authentication::is_remember_me),
        }
    }

    /// Whether the ticket is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired
            || self
                .expiration_policy
                .is_expired(&self.expiration_state(), now)
    }

    /// Like [`Self::is_expired`], remembering a positive answer.
    pub fn check_expired(&mut self, now: DateTime<Utc>) -> bool {
        if !self.expired && self.is_expired(now) {
            self.expired = true;
        }
        self.expired
    }

    /// Expire the ticket immediately. Irreversible.
    pub const fn mark_expired(&mut self) {
        self.expired = true;
    }

    /// TTL hint for the backing store.
    #[must_use]
    pub fn ttl_hint(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.expired {
            return Some(Duration::ZERO);
        }
        self.expiration_policy
            .time_remaining(&self.expiration_state(), now)
    }

    /// Record a use at `now`. The use count never decreases.
    pub fn update_state(&mut self, now: DateTime<Utc>) {
        self.previous_last_used_at = self.last_used_at;
        self.last_used_at = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    // ───────────────────────────────────────────────────────────────
    // Grants
    // ───────────────────────────────────────────────────────────────

    fn require_granting(&self, expected: &[TicketKind]) -> Result<()> {
        if expected.contains(&self.kind()) {
            Ok(())
        } else {
            Err(TicketError::InvalidTicketClass {
                id: self.id.to_string(),
                expected: expected
                    .iter()
                    .map(|k| k.name())
                    .collect::<Vec<_>>()
                    .join(" or "),
                actual: self.kind().name().to_string(),
            })
        }
    }

    /// Grant a service ticket from this TGT.
    ///
    /// Updates this ticket's use state and tracks the new ticket. The child is
    /// `from_new_login` when credentials were just provided or this is the
    /// first ticket the session issues.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidTicketClass`] if `self` is not a TGT.
    pub fn grant_service_ticket(
        &mut self,
        id: TicketId,
        service: Service,
        spec: ChildTicketSpec,
        credentials_provided: bool,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        self.require_granting(&[TicketKind::TicketGranting])?;

        let from_new_login = credentials_provided || self.count_of_uses == 0;
        self.update_state(now);

        self.track_service(&id, &service, &spec, now);

        Ok(Self::new(
            id,
            spec.policy,
            now,
            TicketBody::Service(ServiceTicket {
                granting_ticket_id: self.id.clone(),
                service,
                from_new_login,
                reusable: spec.reusable,
                proxy_granting_ticket: None,
            }),
        ))
    }

    /// Grant a proxy ticket from this PGT.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidTicketClass`] if `self` is not a PGT.
    pub fn grant_proxy_ticket(
        &mut self,
        id: TicketId,
        service: Service,
        proxy_chain: Vec<Service>,
        spec: ChildTicketSpec,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        self.require_granting(&[TicketKind::ProxyGranting])?;
        self.update_state(now);
        self.track_service(&id, &service, &spec, now);

        Ok(Self::new(
            id,
            spec.policy,
            now,
            TicketBody::Proxy(ProxyTicket {
                granting_ticket_id: self.id.clone(),
                service,
                proxy_chain,
                reusable: spec.reusable,
                proxy_granting_ticket: None,
            }),
        ))
    }

    /// Delegate a proxy-granting ticket from this TGT or PGT to `proxied_by`.
    ///
    /// Counts as a use of this ticket.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidTicketClass`] if `self` does not grant.
    pub fn grant_proxy_granting_ticket(
        &mut self,
        id: TicketId,
        proxied_by: Service,
        authentication: Authentication,
        policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        self.require_granting(&[TicketKind::TicketGranting, TicketKind::ProxyGranting])?;
        self.update_state(now);

        let parent_id = self.id.clone();
        if let Some(granting) = self.as_granting_mut() {
            granting.descendant_tickets.insert(id.clone());
            granting
                .proxy_granting_tickets
                .insert(id.clone(), proxied_by.clone());
        }

        Ok(Self::new(
            id,
            policy,
            now,
            TicketBody::ProxyGranting(GrantingTicket::new(
                authentication,
                Some(parent_id),
                Some(proxied_by),
            )),
        ))
    }

    /// Record that this service or proxy ticket delegated `pgt_id`.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketCreation`] if it already delegated one
    /// - [`TicketError::InvalidTicketClass`] for granting tickets
    pub fn claim_proxy_granting_ticket(&mut self, pgt_id: TicketId) -> Result<()> {
        let kind = self.kind();
        let slot = match &mut self.body {
            TicketBody::Service(st) => &mut st.proxy_granting_ticket,
            TicketBody::Proxy(pt) => &mut pt.proxy_granting_ticket,
            TicketBody::TicketGranting(_) | TicketBody::ProxyGranting(_) => {
                return Err(TicketError::InvalidTicketClass {
                    id: self.id.to_string(),
                    expected: "service or proxy".to_string(),
                    actual: kind.name().to_string(),
                });
            }
        };
        if let Some(existing) = slot {
            return Err(TicketError::creation(format!(
                "ticket {} already delegated {existing}",
                self.id
            )));
        }
        *slot = Some(pgt_id);
        Ok(())
    }

    fn track_service(&mut self, id: &TicketId, service: &Service, spec: &ChildTicketSpec, now: DateTime<Utc>) {
        let sequence = self.count_of_uses;
        if let Some(granting) = self.as_granting_mut() {
            granting.track_service(
                id.clone(),
                service.clone(),
                now,
                sequence,
                spec.only_track_most_recent_session,
            );
        }
    }

    /// Forget a child (used when a grant is rolled back).
    pub(crate) fn forget_child(&mut self, child: &TicketId) {
        if let Some(granting) = self.as_granting_mut() {
            granting.services.remove(child);
            granting.proxy_granting_tickets.remove(child);
            granting.descendant_tickets.remove(child);
        }
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}
