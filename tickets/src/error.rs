//! Error types for ticket lifecycle operations.

use thiserror::Error;

/// Result type alias for ticket operations.
pub type Result<T> = std::result::Result<T, TicketError>;

/// Comprehensive error taxonomy for the ticket engine.
///
/// A failed operation only ever affects the ticket(s) it was working on;
/// none of these variants is fatal to the process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketError {
    // ═══════════════════════════════════════════════════════════
    // Lookup Errors
    // ═══════════════════════════════════════════════════════════

    /// Ticket id is absent, or the ticket expired and was purged.
    #[error("Ticket {id} not found")]
    TicketNotFound {
        /// Requested ticket id
        id: String,
    },

    /// Ticket exists but is not of the requested kind.
    #[error("Ticket {id} is a {actual} ticket, expected {expected}")]
    InvalidTicketClass {
        /// Requested ticket id
        id: String,
        /// Kind the caller asked for
        expected: String,
        /// Kind actually stored
        actual: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Creation Errors
    // ═══════════════════════════════════════════════════════════

    /// Id collision on creation. Implies an attack or a generator bug.
    #[error("Ticket {id} already exists")]
    TicketAlreadyExists {
        /// Colliding ticket id
        id: String,
    },

    /// Parent missing or expired at grant time, or grant refused.
    #[error("Unable to create ticket: {reason}")]
    TicketCreation {
        /// Reason for failure
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Authorization Errors
    // ═══════════════════════════════════════════════════════════

    /// Proxy chain or proxy callback violates service policy.
    #[error("Unauthorized proxying: {reason}")]
    UnauthorizedProxying {
        /// Reason for refusal
        reason: String,
    },

    /// Service is not registered or not allowed to use SSO.
    #[error("Service {service} is not authorized")]
    UnauthorizedService {
        /// Service identifier
        service: String,
    },

    /// Ticket was presented by a service other than the one it was issued for.
    #[error("Ticket {id} was not issued for service {service}")]
    ServiceMismatch {
        /// Ticket id
        id: String,
        /// Service that presented the ticket
        service: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Concurrency
    // ═══════════════════════════════════════════════════════════

    /// Critical section for `key` could not be entered in time.
    #[error("Timed out acquiring lock for {key}")]
    LockTimeout {
        /// Lock key
        key: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Proxying & Logout
    // ═══════════════════════════════════════════════════════════

    /// Proxy callback did not succeed; no IOU is issued.
    #[error("Proxy callback to {url} failed: {reason}")]
    ProxyCallbackFailed {
        /// Callback URL
        url: String,
        /// Reason for failure
        reason: String,
    },

    /// Informational: some services could not be notified of a logout.
    ///
    /// Never blocks ticket deletion.
    #[error("Logout notification failed for {} service(s)", services.len())]
    LogoutDispatchPartialFailure {
        /// Services whose notification failed
        services: Vec<String>,
    },

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Backing store did not answer within the operation timeout.
    #[error("Storage operation {operation} timed out")]
    StorageTimeout {
        /// Store operation name
        operation: &'static str,
    },

    /// Backing store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Ticket could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Ticket could not be encrypted or decrypted.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Outbound HTTP call failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Internal error (should not be exposed to users).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TicketError {
    /// Shorthand for [`TicketError::TicketNotFound`].
    pub fn not_found(id: impl std::fmt::Display) -> Self {
        Self::TicketNotFound { id: id.to_string() }
    }

    /// Shorthand for [`TicketError::TicketCreation`].
    pub fn creation(reason: impl Into<String>) -> Self {
        Self::TicketCreation {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`TicketError::UnauthorizedProxying`].
    pub fn unauthorized_proxying(reason: impl Into<String>) -> Self {
        Self::UnauthorizedProxying {
            reason: reason.into(),
        }
    }

    /// Returns `true` if retrying the same operation may succeed.
    ///
    /// Retry policy belongs to the caller; the registry never retries.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sso_tickets::TicketError;
    /// assert!(TicketError::StorageTimeout { operation: "get" }.is_retryable());
    /// assert!(!TicketError::not_found("ST-1").is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageTimeout { .. } | Self::Storage(_) | Self::LockTimeout { .. }
        )
    }

    /// Returns `true` if this error indicates a security issue.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sso_tickets::TicketError;
    /// assert!(TicketError::TicketAlreadyExists { id: "TGT-1".into() }.is_security_issue());
    /// assert!(!TicketError::not_found("ST-1").is_security_issue());
    /// ```
    #[must_use]
    pub const fn is_security_issue(&self) -> bool {
        matches!(
            self,
            Self::TicketAlreadyExists { .. }
                | Self::UnauthorizedProxying { .. }
                | Self::ServiceMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_message_counts_services() {
        let error = TicketError::LogoutDispatchPartialFailure {
            services: vec!["https://a.example".into(), "https://b.example".into()],
        };
        assert_eq!(
            error.to_string(),
            "Logout notification failed for 2 service(s)"
        );
    }

    #[test]
    fn test_lock_timeout_is_retryable() {
        assert!(TicketError::LockTimeout { key: "ST-1".into() }.is_retryable());
        assert!(!TicketError::creation("expired parent").is_retryable());
    }
}
