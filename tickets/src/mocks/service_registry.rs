//! Mock service registry for testing.

use crate::error::Result;
use crate::providers::ServiceRegistry;
use crate::service::{RegisteredService, Service};
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory service registry. The first matching entry wins.
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Debug, Clone, Default)]
pub struct MockServiceRegistry {
    services: Arc<Mutex<Vec<RegisteredService>>>,
}

impl MockServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_service(self, service: RegisteredService) -> Self {
        self.register(service);
        self
    }

    /// Add an entry.
    pub fn register(&self, service: RegisteredService) {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(service);
    }
}

impl ServiceRegistry for MockServiceRegistry {
    async fn find(&self, service: &Service) -> Result<Option<RegisteredService>> {
        Ok(self
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|registered| registered.matches(service))
            .cloned())
    }
}
