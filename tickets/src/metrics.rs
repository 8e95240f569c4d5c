//! Metric names and descriptions.
//!
//! Metrics are emitted through the `metrics` facade; installing an exporter
//! is up to the embedding application. Call [`describe_metrics`] once after
//! the recorder is installed to attach descriptions.

use ::metrics::{describe_counter, describe_histogram};

/// Tickets added to the registry (label `kind`).
pub const TICKETS_CREATED_TOTAL: &str = "sso_tickets_created_total";

/// Tickets removed from the registry, cascades included (label `kind`).
pub const TICKETS_DELETED_TOTAL: &str = "sso_tickets_deleted_total";

/// Single-use tickets consumed by validation (label `kind`).
pub const TICKETS_CONSUMED_TOTAL: &str = "sso_tickets_consumed_total";

/// Tickets found expired on read and purged.
pub const TICKETS_EXPIRED_TOTAL: &str = "sso_tickets_expired_total";

/// Critical sections abandoned because the lock was not acquired in time.
pub const LOCK_TIMEOUTS_TOTAL: &str = "sso_tickets_lock_timeouts_total";

/// Store calls that exceeded the operation timeout (label `operation`).
pub const STORAGE_TIMEOUTS_TOTAL: &str = "sso_tickets_storage_timeouts_total";

/// Store call latency (label `operation`).
pub const STORAGE_DURATION_SECONDS: &str = "sso_tickets_storage_duration_seconds";

/// Proxy callbacks attempted (label `outcome`).
pub const PROXY_CALLBACKS_TOTAL: &str = "sso_tickets_proxy_callbacks_total";

/// Logout requests produced (label `status`).
pub const LOGOUT_REQUESTS_TOTAL: &str = "sso_tickets_logout_requests_total";

/// Ticket-granting tickets destroyed through logout.
pub const LOGOUTS_TOTAL: &str = "sso_tickets_logouts_total";

/// Registry cleaner runs (label `outcome`).
pub const CLEANER_RUNS_TOTAL: &str = "sso_tickets_cleaner_runs_total";

/// Tickets removed by the registry cleaner.
pub const CLEANER_REMOVED_TOTAL: &str = "sso_tickets_cleaner_removed_total";

/// Register all metric descriptions.
pub fn describe_metrics() {
    // Registry
    describe_counter!(TICKETS_CREATED_TOTAL, "Total number of tickets added to the registry");
    describe_counter!(
        TICKETS_DELETED_TOTAL,
        "Total number of tickets removed from the registry"
    );
    describe_counter!(
        TICKETS_CONSUMED_TOTAL,
        "Total number of single-use tickets consumed"
    );
    describe_counter!(
        TICKETS_EXPIRED_TOTAL,
        "Total number of expired tickets purged on read"
    );

    // Locking and storage
    describe_counter!(LOCK_TIMEOUTS_TOTAL, "Total number of lock acquisition timeouts");
    describe_counter!(
        STORAGE_TIMEOUTS_TOTAL,
        "Total number of ticket store calls that timed out"
    );
    describe_histogram!(
        STORAGE_DURATION_SECONDS,
        "Time taken by ticket store calls"
    );

    // Proxy and logout
    describe_counter!(PROXY_CALLBACKS_TOTAL, "Total number of proxy callbacks attempted");
    describe_counter!(
        LOGOUT_REQUESTS_TOTAL,
        "Total number of single logout requests produced"
    );
    describe_counter!(LOGOUTS_TOTAL, "Total number of ticket-granting tickets logged out");

    // Cleaner
    describe_counter!(CLEANER_RUNS_TOTAL, "Total number of registry cleaner runs");
    describe_counter!(
        CLEANER_REMOVED_TOTAL,
        "Total number of tickets removed by the registry cleaner"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_share_prefix() {
        let names = [
            TICKETS_CREATED_TOTAL,
            TICKETS_DELETED_TOTAL,
            TICKETS_CONSUMED_TOTAL,
            TICKETS_EXPIRED_TOTAL,
            LOCK_TIMEOUTS_TOTAL,
            STORAGE_TIMEOUTS_TOTAL,
            STORAGE_DURATION_SECONDS,
            PROXY_CALLBACKS_TOTAL,
            LOGOUT_REQUESTS_TOTAL,
            LOGOUTS_TOTAL,
            CLEANER_RUNS_TOTAL,
            CLEANER_REMOVED_TOTAL,
        ];
        assert!(names.iter().all(|name| name.starts_with("sso_tickets_")));
    }

    #[test]
    fn test_describe_without_recorder_is_harmless() {
        describe_metrics();
    }
}
