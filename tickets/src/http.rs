//! `reqwest`-based [`HttpClient`].

use crate::error::{Result, TicketError};
use crate::providers::HttpClient;
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use std::time::Duration;

/// Default timeout for proxy callbacks and logout requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for proxy callbacks and back-channel logout.
///
/// Certificates are always verified (rustls). Redirects are not followed: a
/// callback endpoint must answer directly.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Build a client with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Http`] if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| TicketError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing `reqwest` client.
    #[must_use]
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &Url) -> Result<u16> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TicketError::Http(format!("GET {url} failed: {e}")))?;
        Ok(response.status().as_u16())
    }

    async fn post_form(&self, url: &Url, fields: &[(String, String)]) -> Result<u16> {
        let response = self
            .client
            .post(url.clone())
            .form(fields)
            .send()
            .await
            .map_err(|e| TicketError::Http(format!("POST {url} failed: {e}")))?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_host_maps_to_http_error() {
        let client = ReqwestHttpClient::new(Duration::from_millis(200)).unwrap();
        // Port 9 (discard) on localhost is closed in test environments.
        let url = Url::parse("https://127.0.0.1:9/callback").unwrap();
        let err = client.get(&url).await.unwrap_err();
        assert!(matches!(err, TicketError::Http(_)));
    }
}
