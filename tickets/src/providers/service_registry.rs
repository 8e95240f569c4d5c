//! Service registry trait.

use crate::error::Result;
use crate::service::{RegisteredService, Service};
use std::future::Future;

/// Lookup of registered relying services.
///
/// Service definitions are managed elsewhere; the ticket engine only reads
/// them to authorize grants, proxying and logout propagation.
pub trait ServiceRegistry: Send + Sync {
    /// Find the entry covering `service`.
    ///
    /// # Returns
    ///
    /// `None` if the service is not registered.
    ///
    /// # Errors
    ///
    /// Returns error if the backing registry is unavailable.
    fn find(
        &self,
        service: &Service,
    ) -> impl Future<Output = Result<Option<RegisteredService>>> + Send;
}
