//! Proxy handling.
//!
//! When a service validates a ticket and presents a callback URL, the server
//! may delegate authentication to it through a proxy-granting ticket. The real
//! PGT id travels only over the callback channel; the validation response
//! carries an unrelated IOU the service uses to match the two:
//!
//! ```text
//! server ──GET https://callback?pgtIou=PGTIOU-…&pgtId=PGT-…──▶ service
//! server ◀─────────────── validation response (pgtIou only) ─── service
//! ```
//!
//! The IOU is freshly generated, never derived from the PGT id, so seeing
//! validation responses reveals nothing about proxy-granting tickets.

use crate::constants::{prefixes, proxy_params};
use crate::error::{Result, TicketError};
use crate::ids::TicketIdGenerator;
use crate::metrics as names;
use crate::providers::HttpClient;
use crate::providers::http::is_success;
use crate::service::{RegisteredService, Service, url_has_prefix};
use crate::ticket::TicketId;
use metrics::counter;
use reqwest::Url;
use std::future::Future;
use std::sync::Arc;

/// Credentials a service presents to receive a proxy-granting ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCredentials {
    /// Where the PGT id is delivered.
    pub callback_url: Url,
}

impl ServiceCredentials {
    /// Credentials for `callback_url`.
    #[must_use]
    pub const fn new(callback_url: Url) -> Self {
        Self { callback_url }
    }

    /// Service identity of the callback (used as the PGT's `proxied_by`).
    #[must_use]
    pub fn service(&self) -> Service {
        Service::new(self.callback_url.as_str())
    }
}

/// Delivers proxy-granting tickets to services.
pub trait ProxyHandler: Send + Sync {
    /// Whether this handler delivers PGTs at all.
    fn can_handle(&self, credentials: &ServiceCredentials) -> bool;

    /// Deliver `pgt_id` to the service behind `credentials`.
    ///
    /// # Returns
    ///
    /// - `Some(iou)`: the PGT was delivered; `iou` goes in the validation response
    /// - `None`: this protocol does not proxy
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnauthorizedProxying`] for a non-HTTPS callback
    /// - [`TicketError::ProxyCallbackFailed`] if the callback did not answer 2xx
    fn handle(
        &self,
        credentials: &ServiceCredentials,
        pgt_id: &TicketId,
    ) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// CAS 2.0 proxy handler: verifies the endpoint, then calls it back.
pub struct Cas20ProxyHandler<H> {
    http: Arc<H>,
    ids: Arc<dyn TicketIdGenerator>,
}

impl<H> std::fmt::Debug for Cas20ProxyHandler<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cas20ProxyHandler").finish_non_exhaustive()
    }
}

impl<H: HttpClient> Cas20ProxyHandler<H> {
    /// Create a handler using `http` for callbacks and `ids` for IOUs.
    #[must_use]
    pub fn new(http: Arc<H>, ids: Arc<dyn TicketIdGenerator>) -> Self {
        Self { http, ids }
    }

    fn callback_failed(url: &Url, reason: impl Into<String>) -> TicketError {
        counter!(names::PROXY_CALLBACKS_TOTAL, "outcome" => "failure").increment(1);
        TicketError::ProxyCallbackFailed {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

impl<H: HttpClient> ProxyHandler for Cas20ProxyHandler<H> {
    fn can_handle(&self, _credentials: &ServiceCredentials) -> bool {
        true
    }

    async fn handle(
        &self,
        credentials: &ServiceCredentials,
        pgt_id: &TicketId,
    ) -> Result<Option<String>> {
        let endpoint = &credentials.callback_url;
        if endpoint.scheme() != "https" {
            tracing::error!(callback_url = %endpoint, "Refusing proxy callback over plain HTTP");
            return Err(TicketError::unauthorized_proxying(format!(
                "callback {endpoint} is not HTTPS"
            )));
        }

        // The endpoint must answer before any ticket is sent to it.
        let status = self
            .http
            .get(endpoint)
            .await
            .map_err(|e| Self::callback_failed(endpoint, e.to_string()))?;
        if !is_success(status) {
            return Err(Self::callback_failed(
                endpoint,
                format!("endpoint verification returned {status}"),
            ));
        }

        let iou = self.ids.new_ticket_id(prefixes::PROXY_GRANTING_TICKET_IOU);
        let mut callback = endpoint.clone();
        callback
            .query_pairs_mut()
            .append_pair(proxy_params::PGT_IOU, iou.as_str())
            .append_pair(proxy_params::PGT_ID, pgt_id.as_str());

        let status = self
            .http
            .get(&callback)
            .await
            .map_err(|e| Self::callback_failed(endpoint, e.to_string()))?;
        if !is_success(status) {
            return Err(Self::callback_failed(
                endpoint,
                format!("callback returned {status}"),
            ));
        }

        counter!(names::PROXY_CALLBACKS_TOTAL, "outcome" => "success").increment(1);
        tracing::info!(callback_url = %endpoint, "Proxy-granting ticket delivered");
        Ok(Some(iou.to_string()))
    }
}

/// CAS 1.0 handler: the protocol has no proxying.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cas10ProxyHandler;

impl ProxyHandler for Cas10ProxyHandler {
    fn can_handle(&self, _credentials: &ServiceCredentials) -> bool {
        false
    }

    async fn handle(
        &self,
        _credentials: &ServiceCredentials,
        _pgt_id: &TicketId,
    ) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Check that `registered` may receive a PGT at the callback in `credentials`.
///
/// # Errors
///
/// [`TicketError::UnauthorizedProxying`] if the proxy policy refuses it.
pub fn authorize_proxy_callback(
    registered: &RegisteredService,
    credentials: &ServiceCredentials,
) -> Result<()> {
    if registered
        .proxy_policy
        .allows_callback(&credentials.callback_url)
    {
        Ok(())
    } else {
        tracing::warn!(
            service = %registered.name,
            callback_url = %credentials.callback_url,
            "Proxy policy refused callback"
        );
        Err(TicketError::unauthorized_proxying(format!(
            "service {} may not proxy to {}",
            registered.name, credentials.callback_url
        )))
    }
}

/// Check that `registered` accepts a ticket that went through `chain`.
///
/// An empty chain (a plain service ticket) is always accepted. Otherwise the
/// service must accept proxy tickets, and if it names authorized proxies
/// every service in the chain must match one of them.
///
/// # Errors
///
/// [`TicketError::UnauthorizedProxying`] on the first violation.
pub fn authorize_proxy_chain(chain: &[Service], registered: &RegisteredService) -> Result<()> {
    if chain.is_empty() {
        return Ok(());
    }

    if !registered.accepts_proxy_tickets {
        return Err(TicketError::unauthorized_proxying(format!(
            "service {} does not accept proxy tickets",
            registered.name
        )));
    }

    if registered.authorized_proxies.is_empty() {
        return Ok(());
    }

    for proxy in chain {
        let trusted = Url::parse(proxy.normalized()).is_ok_and(|url| {
            registered
                .authorized_proxies
                .iter()
                .any(|prefix| url_has_prefix(prefix, &url))
        });
        if !trusted {
            tracing::error!(
                service = %registered.name,
                proxy = %proxy,
                "Untrusted proxy in chain"
            );
            return Err(TicketError::unauthorized_proxying(format!(
                "proxy {proxy} is not trusted by {}",
                registered.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockHttpClient, SequentialTicketIdGenerator};

    fn handler(http: &MockHttpClient) -> Cas20ProxyHandler<MockHttpClient> {
        Cas20ProxyHandler::new(
            Arc::new(http.clone()),
            Arc::new(SequentialTicketIdGenerator::new()),
        )
    }

    fn credentials(url: &str) -> ServiceCredentials {
        ServiceCredentials::new(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_delivers_pgt_and_returns_iou() {
        let http = MockHttpClient::new();
        let iou = handler(&http)
            .handle(&credentials("https://proxy.example/cb"), &"PGT-1".into())
            .await
            .unwrap()
            .unwrap();

        assert!(iou.starts_with("PGTIOU-"));
        let requests = http.requests();
        assert_eq!(requests.len(), 2);
        let callback = &requests[1].url;
        let params: Vec<(String, String)> = callback.query_pairs().into_owned().collect();
        assert!(params.contains(&("pgtId".into(), "PGT-1".into())));
        assert!(params.contains(&("pgtIou".into(), iou.clone())));
        assert!(!iou.contains("PGT-1"));
    }

    #[tokio::test]
    async fn test_plain_http_callback_is_refused() {
        let http = MockHttpClient::new();
        let err = handler(&http)
            .handle(&credentials("http://proxy.example/cb"), &"PGT-1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::UnauthorizedProxying { .. }));
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_non_success_status_fails() {
        let http = MockHttpClient::new();
        http.respond_with("https://proxy.example", 404);
        let err = handler(&http)
            .handle(&credentials("https://proxy.example/cb"), &"PGT-1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::ProxyCallbackFailed { .. }));
        // Nothing sent after the failed verification.
        assert_eq!(http.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cas10_does_not_proxy() {
        let handler = Cas10ProxyHandler;
        assert!(!handler.can_handle(&credentials("https://proxy.example/cb")));
        let iou = handler
            .handle(&credentials("https://proxy.example/cb"), &"PGT-1".into())
            .await
            .unwrap();
        assert!(iou.is_none());
    }

    #[test]
    fn test_proxy_chain_authorization() {
        let chain = vec![Service::new("https://proxy.example/app")];
        let open = RegisteredService::new(1, "open", "https://target.example");
        assert!(authorize_proxy_chain(&chain, &open).is_ok());
        assert!(authorize_proxy_chain(&[], &open.clone().rejecting_proxy_tickets()).is_ok());

        let closed = open.clone().rejecting_proxy_tickets();
        assert!(authorize_proxy_chain(&chain, &closed).is_err());

        let picky = open.with_authorized_proxies(vec!["https://trusted.example".into()]);
        let err = authorize_proxy_chain(&chain, &picky).unwrap_err();
        assert!(matches!(err, TicketError::UnauthorizedProxying { .. }));
    }

    #[test]
    fn test_authorized_proxies_compare_hosts_exactly() {
        let target = RegisteredService::new(1, "target", "https://target.example")
            .with_authorized_proxies(vec!["https://trusted.example".into()]);

        let trusted = [Service::new("https://trusted.example/pgt")];
        assert!(authorize_proxy_chain(&trusted, &target).is_ok());

        for proxy in [
            "https://trusted.example.evil.com/pgt",
            "https://trusted.example@evil.com/pgt",
            "trusted.example/pgt",
        ] {
            let err = authorize_proxy_chain(&[Service::new(proxy)], &target).unwrap_err();
            assert!(matches!(err, TicketError::UnauthorizedProxying { .. }), "{proxy}");
        }
    }
}
