//! Authentication results carried by ticket-granting tickets.
//!
//! The credential-verification chain that produces these values lives outside
//! the ticket engine. The engine only stores an [`Authentication`] in the TGT
//! and forwards it in validation [`Assertion`](crate::cas::Assertion)s.

use crate::constants::attributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Multi-valued attribute map.
///
/// Values are plain strings so the map stays representable in every codec the
/// stores use (including `bincode`, which cannot carry self-describing values).
pub type Attributes = BTreeMap<String, Vec<String>>;

/// Authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier (e.g. the username).
    pub id: String,

    /// Principal attributes released by the attribute repository.
    pub attributes: Attributes,
}

impl Principal {
    /// Principal without attributes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }
}

/// Result of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    /// Who authenticated.
    pub principal: Principal,

    /// Authentication metadata (method, remember-me flag, ...).
    pub attributes: Attributes,

    /// When the credentials were verified.
    pub authenticated_at: DateTime<Utc>,

    /// Names of the handlers that accepted the credentials.
    pub successful_handlers: Vec<String>,
}

impl Authentication {
    /// Create an authentication for `principal` at `authenticated_at`.
    #[must_use]
    pub fn new(principal: Principal, authenticated_at: DateTime<Utc>) -> Self {
        Self {
            principal,
            attributes: Attributes::new(),
            authenticated_at,
            successful_handlers: Vec::new(),
        }
    }

    /// Add an authentication attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Record the handler that accepted the credentials.
    #[must_use]
    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.successful_handlers.push(handler.into());
        self
    }

    /// Mark the authentication as remember-me.
    #[must_use]
    pub fn remembered(self) -> Self {
        self.with_attribute(attributes::REMEMBER_ME, "true")
    }

    /// Whether the user opted into a persistent session.
    #[must_use]
    pub fn is_remember_me(&self) -> bool {
        self.attributes
            .get(attributes::REMEMBER_ME)
            .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case("true")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sso_testing::test_epoch;

    #[test]
    fn test_remember_me_flag() {
        let auth = Authentication::new(Principal::new("casuser"), test_epoch());
        assert!(!auth.is_remember_me());
        assert!(auth.remembered().is_remember_me());
    }

    #[test]
    fn test_attributes_are_multi_valued() {
        let auth = Authentication::new(Principal::new("casuser"), test_epoch())
            .with_attribute("method", "password")
            .with_attribute("method", "otp");
        assert_eq!(auth.attributes["method"], vec!["password", "otp"]);
    }
}
