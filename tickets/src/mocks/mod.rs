//! Mock collaborator implementations for testing.
//!
//! In-memory, inspectable implementations of the provider traits for use in
//! unit and integration tests.

pub mod http;
pub mod ids;
pub mod post_processor;
pub mod service_registry;
pub mod store;

pub use http::{MockHttpClient, RecordedRequest};
pub use ids::SequentialTicketIdGenerator;
pub use post_processor::RecordingLogoutPostProcessor;
pub use service_registry::MockServiceRegistry;
pub use store::FaultyTicketStore;
