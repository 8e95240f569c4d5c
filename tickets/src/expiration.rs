//! Expiration policies.
//!
//! An [`ExpirationPolicy`] is attached to a ticket when it is created and
//! travels with it through serialization, so a ticket rehydrated on another
//! node evaluates expiry exactly as it would have on the node that issued it.
//!
//! Policies are pure values: they hold durations only, never references to
//! shared state, and evaluate against an [`ExpirationState`] snapshot plus the
//! current instant supplied by the caller's clock.
//!
//! # Monotonicity
//!
//! For a fixed ticket state every policy is monotonic in `now`: once
//! `is_expired` returns `true` it stays `true` for every later instant. The
//! throttle of [`ExpirationPolicy::ThrottledUseAndTimeout`] would break that
//! property ("too soon" becomes "fine" a moment later), so it is exposed
//! separately through [`ExpirationPolicy::is_throttled`] and enforced at grant
//! time by the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of the ticket metadata a policy is allowed to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationState {
    /// Creation instant.
    pub created_at: DateTime<Utc>,

    /// Last time the ticket was used (equals `created_at` until first use).
    pub last_used_at: DateTime<Utc>,

    /// Use before the last one.
    pub previous_last_used_at: DateTime<Utc>,

    /// Number of times the ticket was used.
    pub count_of_uses: u32,

    /// Whether the originating authentication asked for a persistent session.
    pub remember_me: bool,
}

/// Expiration strategy attached to a ticket at creation.
///
/// Externally tagged so that non-self-describing codecs (`bincode`) can carry
/// it across the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpirationPolicy {
    /// Ticket never expires. For system and test use; discouraged in production.
    NeverExpires,

    /// Absolute lifetime from creation.
    HardTimeout {
        /// Maximum lifetime.
        time_to_live: Duration,
    },

    /// Sliding idle timeout, reset on every use.
    Timeout {
        /// Maximum idle time.
        time_to_kill: Duration,
    },

    /// Expires after a number of uses, or after a lifetime from creation.
    MultiTimeUseOrTimeout {
        /// Maximum number of uses.
        number_of_uses: u32,
        /// Maximum lifetime.
        time_to_kill: Duration,
    },

    /// Sliding idle timeout plus a minimum interval between uses.
    ThrottledUseAndTimeout {
        /// Maximum idle time.
        time_to_kill: Duration,
        /// Minimum time between two uses.
        time_in_between_uses: Duration,
    },

    /// Hard maximum lifetime combined with a sliding idle timeout.
    TicketGrantingTicket {
        /// Absolute maximum lifetime.
        max_time_to_live: Duration,
        /// Maximum idle time.
        time_to_kill: Duration,
    },

    /// Delegates to `remember_me` when the authentication opted into a
    /// persistent session, otherwise to `session`.
    RememberMeDelegating {
        /// Policy for remember-me sessions (usually much longer).
        remember_me: Box<ExpirationPolicy>,
        /// Policy for regular sessions.
        session: Box<ExpirationPolicy>,
    },
}

/// Time elapsed from `from` to `now`, zero when `now` is earlier.
fn elapsed(from: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - from).to_std().unwrap_or_default()
}

/// Time left until `from + span`, zero when already past.
fn remaining(from: DateTime<Utc>, span: Duration, now: DateTime<Utc>) -> Duration {
    span.saturating_sub(elapsed(from, now))
}

impl ExpirationPolicy {
    /// Absolute lifetime policy.
    #[must_use]
    pub const fn hard_timeout(time_to_live: Duration) -> Self {
        Self::HardTimeout { time_to_live }
    }

    /// Sliding idle timeout policy.
    #[must_use]
    pub const fn timeout(time_to_kill: Duration) -> Self {
        Self::Timeout { time_to_kill }
    }

    /// Use-count or lifetime policy.
    #[must_use]
    pub const fn multi_time_use(number_of_uses: u32, time_to_kill: Duration) -> Self {
        Self::MultiTimeUseOrTimeout {
            number_of_uses,
            time_to_kill,
        }
    }

    /// Remember-me aware policy.
    #[must_use]
    pub fn remember_me(remember_me: Self, session: Self) -> Self {
        Self::RememberMeDelegating {
            remember_me: Box::new(remember_me),
            session: Box::new(session),
        }
    }

    /// Short policy name for logs and metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NeverExpires => "never_expires",
            Self::HardTimeout { .. } => "hard_timeout",
            Self::Timeout { .. } => "timeout",
            Self::MultiTimeUseOrTimeout { .. } => "multi_time_use_or_timeout",
            Self::ThrottledUseAndTimeout { .. } => "throttled_use_and_timeout",
            Self::TicketGrantingTicket { .. } => "ticket_granting_ticket",
            Self::RememberMeDelegating { .. } => "remember_me_delegating",
        }
    }

    /// Policy that actually applies to `state` (resolves remember-me delegation).
    #[must_use]
    pub fn effective(&self, state: &ExpirationState) -> &Self {
        match self {
            Self::RememberMeDelegating {
                remember_me,
                session,
            } => {
                if state.remember_me {
                    remember_me.effective(state)
                } else {
                    session.effective(state)
                }
            }
            other => other,
        }
    }

    /// Whether a ticket in `state` is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, state: &ExpirationState, now: DateTime<Utc>) -> bool {
        match self.effective(state) {
            Self::NeverExpires => false,
            Self::HardTimeout { time_to_live } => elapsed(state.created_at, now) > *time_to_live,
            Self::Timeout { time_to_kill }
            | Self::ThrottledUseAndTimeout { time_to_kill, .. } => {
                elapsed(state.last_used_at, now) > *time_to_kill
            }
            Self::MultiTimeUseOrTimeout {
                number_of_uses,
                time_to_kill,
            } => {
                state.count_of_uses >= *number_of_uses
                    || elapsed(state.created_at, now) > *time_to_kill
            }
            Self::TicketGrantingTicket {
                max_time_to_live,
                time_to_kill,
            } => {
                elapsed(state.created_at, now) > *max_time_to_live
                    || elapsed(state.last_used_at, now) > *time_to_kill
            }
            // `effective` never returns a delegating policy.
            Self::RememberMeDelegating { .. } => false,
        }
    }

    /// Whether a new use at `now` would come too soon after the previous one.
    ///
    /// Only [`ExpirationPolicy::ThrottledUseAndTimeout`] ever throttles.
    #[must_use]
    pub fn is_throttled(&self, state: &ExpirationState, now: DateTime<Utc>) -> bool {
        match self.effective(state) {
            Self::ThrottledUseAndTimeout {
                time_in_between_uses,
                ..
            } => state.count_of_uses > 0 && elapsed(state.last_used_at, now) < *time_in_between_uses,
            _ => false,
        }
    }

    /// Time a ticket in `state` has left at `now` if nobody touches it.
    ///
    /// Passed to backends as a TTL hint for store-side eviction. It is an
    /// optimization only: reads always re-evaluate [`Self::is_expired`].
    /// `None` means the ticket never expires on its own.
    #[must_use]
    pub fn time_remaining(&self, state: &ExpirationState, now: DateTime<Utc>) -> Option<Duration> {
        match self.effective(state) {
            Self::NeverExpires | Self::RememberMeDelegating { .. } => None,
            Self::HardTimeout { time_to_live } => {
                Some(remaining(state.created_at, *time_to_live, now))
            }
            Self::Timeout { time_to_kill }
            | Self::ThrottledUseAndTimeout { time_to_kill, .. } => {
                Some(remaining(state.last_used_at, *time_to_kill, now))
            }
            Self::MultiTimeUseOrTimeout { time_to_kill, .. } => {
                Some(remaining(state.created_at, *time_to_kill, now))
            }
            Self::TicketGrantingTicket {
                max_time_to_live,
                time_to_kill,
            } => Some(
                remaining(state.created_at, *max_time_to_live, now)
                    .min(remaining(state.last_used_at, *time_to_kill, now)),
            ),
        }
    }
}

impl Default for ExpirationPolicy {
    /// Eight hours absolute, two hours idle: the usual session policy.
    fn default() -> Self {
        Self::TicketGrantingTicket {
            max_time_to_live: Duration::from_secs(8 * 60 * 60),
            time_to_kill: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use sso_testing::test_epoch;

    fn state() -> ExpirationState {
        let t = test_epoch();
        ExpirationState {
            created_at: t,
            last_used_at: t,
            previous_last_used_at: t,
            count_of_uses: 0,
            remember_me: false,
        }
    }

    #[test]
    fn test_hard_timeout_ignores_use() {
        let policy = ExpirationPolicy::hard_timeout(Duration::from_secs(60));
        let mut s = state();
        s.last_used_at = test_epoch() + ChronoDuration::seconds(59);

        assert!(!policy.is_expired(&s, test_epoch() + ChronoDuration::seconds(60)));
        assert!(policy.is_expired(&s, test_epoch() + ChronoDuration::seconds(61)));
    }

    #[test]
    fn test_sliding_timeout_resets_on_use() {
        let policy = ExpirationPolicy::timeout(Duration::from_secs(60));
        let mut s = state();
        s.last_used_at = test_epoch() + ChronoDuration::seconds(50);

        assert!(!policy.is_expired(&s, test_epoch() + ChronoDuration::seconds(100)));
        assert!(policy.is_expired(&s, test_epoch() + ChronoDuration::seconds(111)));
    }

    #[test]
    fn test_multi_time_use_expires_on_count() {
        let policy = ExpirationPolicy::multi_time_use(1, Duration::from_secs(10));
        let mut s = state();
        assert!(!policy.is_expired(&s, test_epoch()));

        s.count_of_uses = 1;
        assert!(policy.is_expired(&s, test_epoch()));
    }

    #[test]
    fn test_ticket_granting_policy_hard_cap_wins_over_activity() {
        let policy = ExpirationPolicy::TicketGrantingTicket {
            max_time_to_live: Duration::from_secs(100),
            time_to_kill: Duration::from_secs(30),
        };
        let mut s = state();
        s.last_used_at = test_epoch() + ChronoDuration::seconds(95);

        assert!(!policy.is_expired(&s, test_epoch() + ChronoDuration::seconds(99)));
        assert!(policy.is_expired(&s, test_epoch() + ChronoDuration::seconds(101)));
    }

    #[test]
    fn test_remember_me_selects_longer_policy() {
        let policy = ExpirationPolicy::remember_me(
            ExpirationPolicy::hard_timeout(Duration::from_secs(3600)),
            ExpirationPolicy::hard_timeout(Duration::from_secs(60)),
        );
        let later = test_epoch() + ChronoDuration::seconds(120);

        let mut s = state();
        assert!(policy.is_expired(&s, later));

        s.remember_me = true;
        assert!(!policy.is_expired(&s, later));
    }

    #[test]
    fn test_throttle_is_not_expiry() {
        let policy = ExpirationPolicy::ThrottledUseAndTimeout {
            time_to_kill: Duration::from_secs(60),
            time_in_between_uses: Duration::from_secs(5),
        };
        let mut s = state();
        s.count_of_uses = 1;
        let now = test_epoch() + ChronoDuration::seconds(2);

        assert!(policy.is_throttled(&s, now));
        assert!(!policy.is_expired(&s, now));
        assert!(!policy.is_throttled(&s, test_epoch() + ChronoDuration::seconds(6)));
    }

    #[test]
    fn test_time_remaining_never_negative() {
        let policy = ExpirationPolicy::hard_timeout(Duration::from_secs(10));
        let remaining = policy.time_remaining(&state(), test_epoch() + ChronoDuration::hours(1));
        assert_eq!(remaining, Some(Duration::ZERO));
        assert_eq!(ExpirationPolicy::NeverExpires.time_remaining(&state(), test_epoch()), None);
    }
}
