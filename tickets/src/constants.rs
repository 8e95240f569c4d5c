//! Ticket engine constants.
//!
//! This module contains constant values used throughout the ticket engine.

/// Ticket id prefixes, one per ticket kind.
pub mod prefixes {
    /// Ticket-granting ticket.
    pub const TICKET_GRANTING_TICKET: &str = "TGT";

    /// Service ticket.
    pub const SERVICE_TICKET: &str = "ST";

    /// Proxy-granting ticket.
    pub const PROXY_GRANTING_TICKET: &str = "PGT";

    /// Proxy-granting ticket IOU handed out in validation responses.
    pub const PROXY_GRANTING_TICKET_IOU: &str = "PGTIOU";

    /// Proxy ticket.
    pub const PROXY_TICKET: &str = "PT";

    /// Logout request id.
    pub const LOGOUT_REQUEST: &str = "LR";
}

/// Authentication attribute names the engine understands.
pub mod attributes {
    /// Set to `"true"` when the user opted into a persistent session.
    pub const REMEMBER_ME: &str = "remember_me";
}

/// Proxy callback query parameter names.
pub mod proxy_params {
    /// Parameter carrying the IOU.
    pub const PGT_IOU: &str = "pgtIou";

    /// Parameter carrying the real proxy-granting ticket id.
    pub const PGT_ID: &str = "pgtId";
}

/// Lock key used by the registry cleaner so only one node reaps at a time.
pub const CLEANER_LOCK_KEY: &str = "ticket-registry-cleaner";

/// Minimum number of random bytes in a generated ticket id.
pub const MIN_TICKET_ID_RANDOM_BYTES: usize = 20;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_are_distinct() {
        let all = [
            prefixes::TICKET_GRANTING_TICKET,
            prefixes::SERVICE_TICKET,
            prefixes::PROXY_GRANTING_TICKET,
            prefixes::PROXY_GRANTING_TICKET_IOU,
            prefixes::PROXY_TICKET,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
