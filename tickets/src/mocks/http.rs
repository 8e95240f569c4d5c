//! Mock HTTP client for testing.

use crate::error::{Result, TicketError};
use crate::providers::HttpClient;
use reqwest::Url;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One request seen by [`MockHttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// `"GET"` or `"POST"`.
    pub method: &'static str,
    /// Full request URL, query included.
    pub url: Url,
    /// Form fields (empty for `GET`).
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct State {
    requests: Vec<RecordedRequest>,
    statuses: Vec<(String, u16)>,
    failing: Vec<String>,
}

/// Mock HTTP client.
///
/// Answers 200 unless a rule registered with [`respond_with`] or
/// [`fail_for`] matches the URL prefix. Every request is recorded. Clones
/// share state.
///
/// **WARNING**: Do NOT use in production. This is for testing only!
///
/// [`respond_with`]: MockHttpClient::respond_with
/// [`fail_for`]: MockHttpClient::fail_for
#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    state: Arc<Mutex<State>>,
}

impl MockHttpClient {
    /// Create a client answering 200 to everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `status` to URLs starting with `prefix`.
    pub fn respond_with(&self, prefix: impl Into<String>, status: u16) {
        self.state().statuses.push((prefix.into(), status));
    }

    /// Fail requests to URLs starting with `prefix` with a transport error.
    pub fn fail_for(&self, prefix: impl Into<String>) {
        self.state().failing.push(prefix.into());
    }

    /// Requests seen so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    /// `POST` requests seen so far.
    #[must_use]
    pub fn posts(&self) -> Vec<RecordedRequest> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.method == "POST")
            .cloned()
            .collect()
    }

    fn answer(&self, request: RecordedRequest) -> Result<u16> {
        let mut state = self.state();
        let url = request.url.to_string();
        state.requests.push(request);

        if state.failing.iter().any(|p| url.starts_with(p.as_str())) {
            return Err(TicketError::Http(format!("connection refused: {url}")));
        }
        // Latest matching rule wins.
        Ok(state
            .statuses
            .iter()
            .rev()
            .find(|(p, _)| url.starts_with(p.as_str()))
            .map_or(200, |(_, status)| *status))
    }
}

impl HttpClient for MockHttpClient {
    async fn get(&self, url: &Url) -> Result<u16> {
        self.answer(RecordedRequest {
            method: "GET",
            url: url.clone(),
            fields: Vec::new(),
        })
    }

    async fn post_form(&self, url: &Url, fields: &[(String, String)]) -> Result<u16> {
        self.answer(RecordedRequest {
            method: "POST",
            url: url.clone(),
            fields: fields.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_match_by_prefix() {
        let http = MockHttpClient::new();
        http.respond_with("https://a.example", 500);
        http.fail_for("https://b.example");

        let a = Url::parse("https://a.example/logout").unwrap();
        let b = Url::parse("https://b.example/logout").unwrap();
        let c = Url::parse("https://c.example/logout").unwrap();

        assert_eq!(http.get(&a).await.unwrap(), 500);
        assert!(http.post_form(&b, &[]).await.is_err());
        assert_eq!(http.get(&c).await.unwrap(), 200);
        assert_eq!(http.requests().len(), 3);
        assert_eq!(http.posts().len(), 1);
    }
}
