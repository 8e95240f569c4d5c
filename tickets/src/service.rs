//! Relying-party services and their registry entries.

use reqwest::Url;
use serde::{Deserialize, Serialize};

/// A relying application, identified by the URL it presented.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Service {
    /// Service identifier as presented (usually the service URL).
    pub id: String,
}

impl Service {
    /// Create a service from its identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Identifier with query string, fragment and `;jsessionid` removed.
    ///
    /// Two services with the same normalized form are treated as the same
    /// application session for tracking and logout purposes.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sso_tickets::service::Service;
    /// let service = Service::new("https://app.example/home;JSESSIONID=abc?x=1#top");
    /// assert_eq!(service.normalized(), "https://app.example/home");
    /// ```
    #[must_use]
    pub fn normalized(&self) -> &str {
        let mut end = self.id.len();
        for marker in ['?', '#'] {
            if let Some(pos) = self.id.find(marker) {
                end = end.min(pos);
            }
        }
        if let Some(pos) = self.id.to_ascii_lowercase().find(";jsessionid") {
            end = end.min(pos);
        }
        &self.id[..end]
    }

    /// Whether `other` designates the same application as `self`.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// How a registered service wants to be told about logouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogoutType {
    /// Never notify this service.
    None,

    /// Server-to-server POST from the SSO server.
    #[default]
    BackChannel,

    /// Delivered by the user's browser (redirect or embedded frame).
    FrontChannel,
}

/// Whether a service may obtain proxy-granting tickets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProxyPolicy {
    /// Proxying refused.
    #[default]
    Refuse,

    /// Proxying allowed for callback URLs starting with `callback_prefix`.
    Allow {
        /// Allowed callback URL prefix.
        callback_prefix: String,
    },
}

impl ProxyPolicy {
    /// Whether `callback` may receive a proxy-granting ticket.
    #[must_use]
    pub fn allows_callback(&self, callback: &Url) -> bool {
        match self {
            Self::Refuse => false,
            Self::Allow { callback_prefix } => url_has_prefix(callback_prefix, callback),
        }
    }
}

/// Registry entry describing what a service is allowed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredService {
    /// Numeric id.
    pub id: u64,

    /// Display name.
    pub name: String,

    /// Prefix that presented service identifiers must start with.
    pub service_id: String,

    /// Where logout notifications go. Defaults to the service URL itself.
    pub logout_url: Option<Url>,

    /// Logout propagation preference. `None` falls back to the global default.
    pub logout_type: Option<LogoutType>,

    /// Proxy-granting policy.
    pub proxy_policy: ProxyPolicy,

    /// Whether this service accepts proxy tickets at all.
    pub accepts_proxy_tickets: bool,

    /// Prefixes of proxies trusted in a proxy chain. Empty trusts any proxy.
    pub authorized_proxies: Vec<String>,

    /// Whether the service participates in single sign-on.
    pub sso_enabled: bool,
}

impl RegisteredService {
    /// Entry matching services that start with `service_id`.
    pub fn new(id: u64, name: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            service_id: service_id.into(),
            logout_url: None,
            logout_type: None,
            proxy_policy: ProxyPolicy::Refuse,
            accepts_proxy_tickets: true,
            authorized_proxies: Vec::new(),
            sso_enabled: true,
        }
    }

    /// Set the logout notification URL.
    #[must_use]
    pub fn with_logout_url(mut self, url: Url) -> Self {
        self.logout_url = Some(url);
        self
    }

    /// Set the logout propagation preference.
    #[must_use]
    pub const fn with_logout_type(mut self, logout_type: LogoutType) -> Self {
        self.logout_type = Some(logout_type);
        self
    }

    /// Set the proxy-granting policy.
    #[must_use]
    pub fn with_proxy_policy(mut self, policy: ProxyPolicy) -> Self {
        self.proxy_policy = policy;
        self
    }

    /// Refuse proxy tickets.
    #[must_use]
    pub const fn rejecting_proxy_tickets(mut self) -> Self {
        self.accepts_proxy_tickets = false;
        self
    }

    /// Trust only proxies starting with one of `prefixes`.
    #[must_use]
    pub fn with_authorized_proxies(mut self, prefixes: Vec<String>) -> Self {
        self.authorized_proxies = prefixes;
        self
    }

    /// Opt the service out of single sign-on.
    #[must_use]
    pub const fn without_sso(mut self) -> Self {
        self.sso_enabled = false;
        self
    }

    /// Whether `service` is covered by this entry.
    #[must_use]
    pub fn matches(&self, service: &Service) -> bool {
        Url::parse(service.normalized()).is_ok_and(|url| url_has_prefix(&self.service_id, &url))
    }
}

/// Whether `candidate` lies under the URL `prefix`.
///
/// Scheme, host and port must be equal, and the path must extend the
/// prefix's path at a segment boundary. A prefix that is not an absolute URL
/// matches nothing.
pub(crate) fn url_has_prefix(prefix: &str, candidate: &Url) -> bool {
    let Ok(prefix) = Url::parse(prefix) else {
        return false;
    };
    if prefix.scheme() != candidate.scheme()
        || prefix.host_str() != candidate.host_str()
        || prefix.port_or_known_default() != candidate.port_or_known_default()
    {
        return false;
    }

    let base = prefix.path();
    candidate.path().strip_prefix(base).is_some_and(|rest| {
        base.ends_with('/') || rest.is_empty() || rest.starts_with('/')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similar_services_match() {
        let a = Service::new("http://host.com/webapp1");
        let b = Service::new("http://host.com/webapp1?test=true");
        let c = Service::new("http://host.com/webapp1;jsessionid=xxx");
        assert!(a.matches(&b));
        assert!(a.matches(&c));
        assert!(!a.matches(&Service::new("http://host.com/webapp2")));
    }

    #[test]
    fn test_registered_service_prefix_match() {
        let entry = RegisteredService::new(1, "app", "https://app.example");
        assert!(entry.matches(&Service::new("https://app.example/login?x=1")));
        assert!(!entry.matches(&Service::new("https://evil.example/app.example")));
        assert!(!entry.matches(&Service::new("https://app.example.evil.com/login")));
        assert!(!entry.matches(&Service::new("https://app.example@evil.com/")));
        assert!(!entry.matches(&Service::new("http://app.example/login")));
    }

    #[test]
    fn test_proxy_policy_callback_prefix() {
        let policy = ProxyPolicy::Allow {
            callback_prefix: "https://app.example/proxy".into(),
        };
        let ok = Url::parse("https://app.example/proxy/callback").unwrap();
        let bad = Url::parse("https://other.example/proxy").unwrap();

        assert!(policy.allows_callback(&ok));
        assert!(!policy.allows_callback(&bad));
        assert!(!ProxyPolicy::Refuse.allows_callback(&ok));
    }

    #[test]
    fn test_proxy_policy_rejects_look_alike_callbacks() {
        let policy = ProxyPolicy::Allow {
            callback_prefix: "https://trusted.example".into(),
        };
        let accepted = ["https://trusted.example/cb", "https://trusted.example:443/cb"];
        let rejected = [
            "https://trusted.example.evil.com/cb",
            "https://trusted.example@evil.com/cb",
            "https://trusted.example:8443/cb",
            "http://trusted.example/cb",
        ];

        for url in accepted {
            assert!(policy.allows_callback(&Url::parse(url).unwrap()), "{url}");
        }
        for url in rejected {
            assert!(!policy.allows_callback(&Url::parse(url).unwrap()), "{url}");
        }
    }

    #[test]
    fn test_path_prefix_stops_at_segment_boundary() {
        let callback = Url::parse("https://app.example/proxy-evil/cb").unwrap();
        assert!(!url_has_prefix("https://app.example/proxy", &callback));
        assert!(url_has_prefix("https://app.example/", &callback));
        assert!(!url_has_prefix("not a url", &callback));
    }
}
