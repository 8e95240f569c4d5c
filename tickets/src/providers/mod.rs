//! Collaborator traits.
//!
//! The ticket engine depends on these traits, never on concrete backends.
//! Production wiring uses the implementations in [`crate::stores`] and
//! [`crate::http`]; tests use [`crate::mocks`].
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────────┐      ┌──────────────────┐
//! │ TicketRegistry   │─────▶│ TicketStore      │─────▶│ memory / Redis   │
//! └──────────────────┘      └──────────────────┘      └──────────────────┘
//! ┌──────────────────┐      ┌──────────────────┐
//! │ Proxy / Logout   │─────▶│ HttpClient       │─────▶  relying services
//! └──────────────────┘      └──────────────────┘
//! ┌──────────────────┐      ┌──────────────────┐
//! │ CentralTicket... │─────▶│ ServiceRegistry  │─────▶  service definitions
//! └──────────────────┘      └──────────────────┘
//! ```

pub mod http;
pub mod service_registry;
pub mod store;

pub use http::HttpClient;
pub use service_registry::ServiceRegistry;
pub use store::TicketStore;
