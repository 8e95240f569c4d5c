//! # SSO Tickets
//!
//! Ticket lifecycle engine for a CAS-style single-sign-on server.
//!
//! ## Features
//!
//! - **Typed tickets**: ticket-granting, service, proxy-granting and proxy
//!   tickets as one closed enum, each carrying its own expiration policy
//! - **Authoritative registry**: unique ids, eager purge of expired tickets,
//!   atomic single-use consumption, cascading deletion
//! - **Pluggable backends**: in-memory or Redis stores, local or distributed
//!   locks, optional encryption at rest
//! - **Single logout**: back-channel and front-channel notification of every
//!   service a session touched
//!
//! ## Architecture
//!
//! ```text
//! authentication ─▶ TGT ─▶ ST ─▶ validation ─▶ (PGT ─▶ PT ─▶ validation)
//!                    │
//!                    └─ destroy ─▶ LogoutManager ─▶ services
//!                                        └─────────▶ TicketRegistry (cascade delete)
//! ```
//!
//! ## Example: service ticket round trip
//!
//! ```
//! # use sso_tickets::*;
//! # use sso_tickets::authentication::{Authentication, Principal};
//! # use sso_tickets::ticket::{ChildTicketSpec, Ticket, TicketKind};
//! # use sso_tickets::service::Service;
//! # use sso_core::environment::system_clock;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let registry = TicketRegistry::new(
//!     InMemoryTicketStore::new(),
//!     NoOpLockRepository,
//!     system_clock(),
//!     RegistryConfig::default(),
//! );
//! let config = TicketConfig::default();
//! let now = registry.now();
//!
//! let tgt = Ticket::ticket_granting(
//!     "TGT-1".into(),
//!     Authentication::new(Principal::new("casuser"), now),
//!     config.tgt.policy(),
//!     now,
//! );
//! registry.add_ticket(&tgt).await?;
//!
//! let st = registry
//!     .grant_child(tgt.id(), TicketKind::TicketGranting, |tgt, now| {
//!         let spec = ChildTicketSpec {
//!             policy: config.st.policy(),
//!             reusable: false,
//!             only_track_most_recent_session: true,
//!         };
//!         tgt.grant_service_ticket("ST-1".into(), Service::new("https://app.example"), spec, true, now)
//!     })
//!     .await?;
//!
//! registry.consume_ticket(st.id(), TicketKind::Service).await?;
//! assert!(registry.consume_ticket(st.id(), TicketKind::Service).await.is_err());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod authentication;
pub mod cas;
pub mod cipher;
pub mod cleaner;
pub mod config;
pub mod constants;
pub mod error;
pub mod expiration;
pub mod http;
pub mod ids;
pub mod lock;
pub mod logout;
pub mod metrics;
pub mod providers;
pub mod proxy;
pub mod registry;
pub mod service;
pub mod stores;
pub mod ticket;

// Mock implementations for testing
#[cfg(feature = "test-utils")]
pub mod mocks;

// Re-export main types for convenience
pub use cas::{Assertion, CentralTicketService, ProxyGrantingOutcome};
pub use cleaner::{CleanupReport, RegistryCleaner};
pub use config::{RegistryConfig, TicketConfig};
pub use error::{Result, TicketError};
pub use expiration::ExpirationPolicy;
pub use http::ReqwestHttpClient;
pub use ids::{DefaultTicketIdGenerator, TicketIdGenerator};
pub use lock::{LockRepository, MaskedHashLockRepository, NoOpLockRepository};
pub use logout::{LogoutManager, LogoutOutcome, LogoutPropagation, LogoutRequestStatus};
pub use proxy::{Cas10ProxyHandler, Cas20ProxyHandler, ProxyHandler, ServiceCredentials};
pub use registry::{DeletionReport, TicketRegistry};
pub use stores::{InMemoryTicketStore, RedisLockRepository, RedisTicketStore};
pub use ticket::{Ticket, TicketId, TicketKind};
