//! Ticket store and lock backends.
//!
//! - **In-memory store** - single-node deployments and tests
//! - **Redis store** - shared store for clustered nodes, optional encryption at rest
//! - **Redis lock repository** - lease-based distributed locks for clustered nodes

pub mod memory;
pub mod redis_lock;
pub mod redis_store;

// Re-exports
pub use memory::InMemoryTicketStore;
pub use redis_lock::RedisLockRepository;
pub use redis_store::RedisTicketStore;
