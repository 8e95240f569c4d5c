//! Outbound HTTP trait.
//!
//! Used for proxy callbacks and back-channel logout. Only the status code is
//! of interest; response bodies are discarded.

use crate::error::Result;
use reqwest::Url;
use std::future::Future;

/// Minimal HTTP client.
pub trait HttpClient: Send + Sync + 'static {
    /// Issue a `GET` request.
    ///
    /// # Returns
    ///
    /// HTTP status code.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Http`](crate::TicketError::Http) on connection,
    /// TLS or timeout failures.
    fn get(&self, url: &Url) -> impl Future<Output = Result<u16>> + Send;

    /// `POST` an `application/x-www-form-urlencoded` body.
    ///
    /// # Returns
    ///
    /// HTTP status code.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Http`](crate::TicketError::Http) on connection,
    /// TLS or timeout failures.
    fn post_form(
        &self,
        url: &Url,
        fields: &[(String, String)],
    ) -> impl Future<Output = Result<u16>> + Send;
}

/// Whether `status` is a 2xx success.
#[must_use]
pub const fn is_success(status: u16) -> bool {
    status >= 200 && status < 300
}
