//! Predictable ticket ids for testing.

use crate::ids::TicketIdGenerator;
use crate::ticket::TicketId;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Generates `{prefix}-{n}` with a separate counter per prefix, so the first
/// ticket-granting ticket is `TGT-1` and the first service ticket `ST-1`.
///
/// **WARNING**: Do NOT use in production. Ids are guessable.
#[derive(Debug, Default)]
pub struct SequentialTicketIdGenerator {
    counters: Mutex<HashMap<String, u64>>,
}

impl SequentialTicketIdGenerator {
    /// Create a generator with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketIdGenerator for SequentialTicketIdGenerator {
    fn new_ticket_id(&self, prefix: &str) -> TicketId {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        TicketId::new(format!("{prefix}-{counter}"))
    }
}
