//! Ticket engine configuration.
//!
//! Configuration values are provided by the embedding application; this
//! module only defines the structures and their defaults. Loading them from
//! files or the environment is the application's job.

use crate::expiration::ExpirationPolicy;
use crate::logout::LogoutPropagation;
use std::time::Duration;

/// Ticket-granting ticket configuration.
#[derive(Debug, Clone)]
pub struct TicketGrantingTicketConfig {
    /// Absolute session lifetime.
    ///
    /// Default: 8 hours
    pub max_time_to_live: Duration,

    /// Idle timeout.
    ///
    /// Default: 2 hours
    pub time_to_kill: Duration,

    /// Lifetime of remember-me sessions. `None` disables remember-me.
    ///
    /// Default: `None`
    pub remember_me_time_to_live: Option<Duration>,

    /// Only keep the most recent service ticket per service for logout.
    ///
    /// Default: `true`
    pub only_track_most_recent_session: bool,
}

impl TicketGrantingTicketConfig {
    /// Set absolute lifetime.
    #[must_use]
    pub const fn with_max_time_to_live(mut self, ttl: Duration) -> Self {
        self.max_time_to_live = ttl;
        self
    }

    /// Set idle timeout.
    #[must_use]
    pub const fn with_time_to_kill(mut self, ttk: Duration) -> Self {
        self.time_to_kill = ttk;
        self
    }

    /// Enable remember-me sessions with the given lifetime.
    #[must_use]
    pub const fn with_remember_me(mut self, ttl: Duration) -> Self {
        self.remember_me_time_to_live = Some(ttl);
        self
    }

    /// Track every session instead of only the most recent one per service.
    #[must_use]
    pub const fn tracking_all_sessions(mut self) -> Self {
        self.only_track_most_recent_session = false;
        self
    }

    /// Expiration policy for new ticket-granting tickets.
    #[must_use]
    pub fn policy(&self) -> ExpirationPolicy {
        let session = ExpirationPolicy::TicketGrantingTicket {
            max_time_to_live: self.max_time_to_live,
            time_to_kill: self.time_to_kill,
        };
        match self.remember_me_time_to_live {
            Some(ttl) => ExpirationPolicy::remember_me(ExpirationPolicy::hard_timeout(ttl), session),
            None => session,
        }
    }
}

impl Default for TicketGrantingTicketConfig {
    fn default() -> Self {
        Self {
            max_time_to_live: Duration::from_secs(8 * 60 * 60),
            time_to_kill: Duration::from_secs(2 * 60 * 60),
            remember_me_time_to_live: None,
            only_track_most_recent_session: true,
        }
    }
}

/// Service ticket configuration.
#[derive(Debug, Clone)]
pub struct ServiceTicketConfig {
    /// Uses before expiry.
    ///
    /// Default: 1
    pub number_of_uses: u32,

    /// Lifetime from creation.
    ///
    /// Default: 10 seconds
    pub time_to_kill: Duration,

    /// Keep the ticket after validation until its policy expires it.
    ///
    /// Default: `false` (single use)
    pub reusable: bool,
}

impl ServiceTicketConfig {
    /// Set uses before expiry.
    #[must_use]
    pub const fn with_number_of_uses(mut self, uses: u32) -> Self {
        self.number_of_uses = uses;
        self
    }

    /// Set lifetime.
    #[must_use]
    pub const fn with_time_to_kill(mut self, ttk: Duration) -> Self {
        self.time_to_kill = ttk;
        self
    }

    /// Opt into reusable service tickets.
    #[must_use]
    pub const fn reusable(mut self) -> Self {
        self.reusable = true;
        self
    }

    /// Expiration policy for new service tickets.
    #[must_use]
    pub const fn policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::multi_time_use(self.number_of_uses, self.time_to_kill)
    }
}

impl Default for ServiceTicketConfig {
    fn default() -> Self {
        Self {
            number_of_uses: 1,
            time_to_kill: Duration::from_secs(10),
            reusable: false,
        }
    }
}

/// Proxy ticket configuration.
#[derive(Debug, Clone)]
pub struct ProxyTicketConfig {
    /// Uses before expiry.
    ///
    /// Default: 1
    pub number_of_uses: u32,

    /// Lifetime from creation.
    ///
    /// Default: 10 seconds
    pub time_to_kill: Duration,

    /// Keep the ticket after validation until its policy expires it.
    ///
    /// Default: `false`
    pub reusable: bool,
}

impl ProxyTicketConfig {
    /// Set uses before expiry.
    #[must_use]
    pub const fn with_number_of_uses(mut self, uses: u32) -> Self {
        self.number_of_uses = uses;
        self
    }

    /// Set lifetime.
    #[must_use]
    pub const fn with_time_to_kill(mut self, ttk: Duration) -> Self {
        self.time_to_kill = ttk;
        self
    }

    /// Expiration policy for new proxy tickets.
    #[must_use]
    pub const fn policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::multi_time_use(self.number_of_uses, self.time_to_kill)
    }
}

impl Default for ProxyTicketConfig {
    fn default() -> Self {
        Self {
            number_of_uses: 1,
            time_to_kill: Duration::from_secs(10),
            reusable: false,
        }
    }
}

/// Proxy-granting ticket configuration.
#[derive(Debug, Clone)]
pub struct ProxyGrantingTicketConfig {
    /// Absolute lifetime.
    ///
    /// Default: 8 hours
    pub max_time_to_live: Duration,

    /// Idle timeout.
    ///
    /// Default: 2 hours
    pub time_to_kill: Duration,
}

impl ProxyGrantingTicketConfig {
    /// Set absolute lifetime.
    #[must_use]
    pub const fn with_max_time_to_live(mut self, ttl: Duration) -> Self {
        self.max_time_to_live = ttl;
        self
    }

    /// Set idle timeout.
    #[must_use]
    pub const fn with_time_to_kill(mut self, ttk: Duration) -> Self {
        self.time_to_kill = ttk;
        self
    }

    /// Expiration policy for new proxy-granting tickets.
    #[must_use]
    pub const fn policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::TicketGrantingTicket {
            max_time_to_live: self.max_time_to_live,
            time_to_kill: self.time_to_kill,
        }
    }
}

impl Default for ProxyGrantingTicketConfig {
    fn default() -> Self {
        Self {
            max_time_to_live: Duration::from_secs(8 * 60 * 60),
            time_to_kill: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Ticket id generation.
#[derive(Debug, Clone)]
pub struct TicketIdConfig {
    /// Random bytes per id (minimum 20).
    ///
    /// Default: 20
    pub random_bytes: usize,

    /// Node identifier appended to every id.
    ///
    /// Default: `None`
    pub suffix: Option<String>,
}

impl TicketIdConfig {
    /// Set the number of random bytes.
    #[must_use]
    pub const fn with_random_bytes(mut self, bytes: usize) -> Self {
        self.random_bytes = bytes;
        self
    }

    /// Set the node suffix.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }
}

impl Default for TicketIdConfig {
    fn default() -> Self {
        Self {
            random_bytes: 20,
            suffix: None,
        }
    }
}

/// Lock repository configuration.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Maximum wait to enter a critical section.
    ///
    /// Default: 3 seconds
    pub timeout: Duration,

    /// `n` in the `2^n` lock table of the masked-hash repository.
    ///
    /// Default: 10 (1024 locks)
    pub table_bits: u32,

    /// Lease of distributed locks; a crashed holder loses the lock after it.
    ///
    /// Default: 30 seconds
    pub lease: Duration,
}

impl LockConfig {
    /// Set acquisition timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set lock table size exponent.
    #[must_use]
    pub const fn with_table_bits(mut self, bits: u32) -> Self {
        self.table_bits = bits;
        self
    }

    /// Set distributed lock lease.
    #[must_use]
    pub const fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            table_bits: 10,
            lease: Duration::from_secs(30),
        }
    }
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Upper bound on every backing-store call.
    ///
    /// Default: 5 seconds
    pub operation_timeout: Duration,
}

impl RegistryConfig {
    /// Set store operation timeout.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
        }
    }
}

/// Single logout configuration.
#[derive(Debug, Clone)]
pub struct SingleLogoutConfig {
    /// Skip service notification entirely (tickets are still destroyed).
    ///
    /// Default: `false`
    pub disabled: bool,

    /// Dispatch back-channel requests in the background.
    ///
    /// Default: `false`
    pub asynchronous: bool,

    /// Propagation used when a service has no preference.
    ///
    /// Default: back-channel
    pub propagation: LogoutPropagation,

    /// Timeout per back-channel request.
    ///
    /// Default: 5 seconds
    pub request_timeout: Duration,
}

impl SingleLogoutConfig {
    /// Disable service notification.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Dispatch in the background.
    #[must_use]
    pub const fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    /// Set default propagation.
    #[must_use]
    pub const fn with_propagation(mut self, propagation: LogoutPropagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Set per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for SingleLogoutConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            asynchronous: false,
            propagation: LogoutPropagation::BackChannel,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Registry cleaner configuration.
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    /// Run the cleaner at all.
    ///
    /// Default: `true`
    pub enabled: bool,

    /// Delay before the first run.
    ///
    /// Default: 15 seconds
    pub start_delay: Duration,

    /// Interval between runs.
    ///
    /// Default: 2 minutes
    pub repeat_interval: Duration,
}

impl CleanerConfig {
    /// Disable the cleaner.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Set start delay.
    #[must_use]
    pub const fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Set repeat interval.
    #[must_use]
    pub const fn with_repeat_interval(mut self, interval: Duration) -> Self {
        self.repeat_interval = interval;
        self
    }
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_delay: Duration::from_secs(15),
            repeat_interval: Duration::from_secs(120),
        }
    }
}

/// Complete ticket engine configuration.
#[derive(Debug, Clone, Default)]
pub struct TicketConfig {
    /// Ticket-granting tickets.
    pub tgt: TicketGrantingTicketConfig,

    /// Service tickets.
    pub st: ServiceTicketConfig,

    /// Proxy tickets.
    pub pt: ProxyTicketConfig,

    /// Proxy-granting tickets.
    pub pgt: ProxyGrantingTicketConfig,

    /// Ticket id generation.
    pub ids: TicketIdConfig,

    /// Lock repository.
    pub lock: LockConfig,

    /// Registry.
    pub registry: RegistryConfig,

    /// Single logout.
    pub slo: SingleLogoutConfig,

    /// Registry cleaner.
    pub cleaner: CleanerConfig,
}

impl TicketConfig {
    /// Set ticket-granting ticket configuration.
    #[must_use]
    pub fn with_tgt(mut self, config: TicketGrantingTicketConfig) -> Self {
        self.tgt = config;
        self
    }

    /// Set service ticket configuration.
    #[must_use]
    pub const fn with_st(mut self, config: ServiceTicketConfig) -> Self {
        self.st = config;
        self
    }

    /// Set proxy ticket configuration.
    #[must_use]
    pub const fn with_pt(mut self, config: ProxyTicketConfig) -> Self {
        self.pt = config;
        self
    }

    /// Set proxy-granting ticket configuration.
    #[must_use]
    pub const fn with_pgt(mut self, config: ProxyGrantingTicketConfig) -> Self {
        self.pgt = config;
        self
    }

    /// Set id generation configuration.
    #[must_use]
    pub fn with_ids(mut self, config: TicketIdConfig) -> Self {
        self.ids = config;
        self
    }

    /// Set lock configuration.
    #[must_use]
    pub const fn with_lock(mut self, config: LockConfig) -> Self {
        self.lock = config;
        self
    }

    /// Set registry configuration.
    #[must_use]
    pub const fn with_registry(mut self, config: RegistryConfig) -> Self {
        self.registry = config;
        self
    }

    /// Set single logout configuration.
    #[must_use]
    pub const fn with_slo(mut self, config: SingleLogoutConfig) -> Self {
        self.slo = config;
        self
    }

    /// Set cleaner configuration.
    #[must_use]
    pub const fn with_cleaner(mut self, config: CleanerConfig) -> Self {
        self.cleaner = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_ticket_defaults_to_single_use() {
        let config = ServiceTicketConfig::default();
        assert!(!config.reusable);
        assert_eq!(
            config.policy(),
            ExpirationPolicy::multi_time_use(1, Duration::from_secs(10))
        );
    }

    #[test]
    fn test_remember_me_wraps_session_policy() {
        let config = TicketGrantingTicketConfig::default()
            .with_remember_me(Duration::from_secs(14 * 24 * 60 * 60));
        assert!(matches!(
            config.policy(),
            ExpirationPolicy::RememberMeDelegating { .. }
        ));
        assert!(matches!(
            TicketGrantingTicketConfig::default().policy(),
            ExpirationPolicy::TicketGrantingTicket { .. }
        ));
    }
}
