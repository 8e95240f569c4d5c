//! # SSO Core
//!
//! Environment traits shared by the SSO ticketing crates.
//!
//! Every piece of the ticket engine that needs the current time receives it
//! through the [`environment::Clock`] trait instead of calling `Utc::now()`
//! directly. Expiration math is always `now - created_at` or
//! `now - last_used_at`, so an injected clock is all a test needs to move a
//! ticket through its whole lifetime deterministically.
//!
//! ## Example
//!
//! ```
//! use sso_core::environment::{Clock, SystemClock};
//!
//! let clock = SystemClock;
//! let earlier = clock.now();
//! assert!(clock.now() >= earlier);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment module - dependency injection traits
///
/// All external dependencies of the ticket engine that are not storage or
/// network related are abstracted here and injected at construction time.
pub mod environment {
    use chrono::{DateTime, Utc};
    use std::sync::Arc;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    ///
    /// // Test - fixed or manually advanced time
    /// let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(start));
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time in UTC.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    impl<C: Clock + ?Sized> Clock for Arc<C> {
        fn now(&self) -> DateTime<Utc> {
            (**self).now()
        }
    }

    /// Shared clock handle used across the ticket engine.
    pub type SharedClock = Arc<dyn Clock>;

    /// Build a shared handle to the system clock.
    #[must_use]
    pub fn system_clock() -> SharedClock {
        Arc::new(SystemClock)
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock, system_clock};

    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn test_shared_clock_delegates() {
        let clock = system_clock();
        let before = chrono::Utc::now();
        let now = clock.now();
        assert!(now >= before);
    }
}
