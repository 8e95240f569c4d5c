//! Ticket id generation.
//!
//! Ids have the shape `{PREFIX}-{counter}-{random}[-{suffix}]`:
//!
//! - `PREFIX` names the ticket kind (`TGT`, `ST`, `PGT`, `PGTIOU`, `PT`)
//! - `counter` is a process-local sequence number, unique per generator
//! - `random` is at least 20 bytes from the OS CSPRNG, base64url without padding
//! - `suffix` optionally names the issuing node
//!
//! The random part is what makes ids unguessable; the counter only keeps ids
//! from one node distinct even if the random source repeated.

use crate::config::TicketIdConfig;
use crate::constants::MIN_TICKET_ID_RANDOM_BYTES;
use crate::ticket::TicketId;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of fresh ticket ids.
pub trait TicketIdGenerator: Send + Sync {
    /// Generate a new id carrying `prefix`.
    fn new_ticket_id(&self, prefix: &str) -> TicketId;
}

impl<G: TicketIdGenerator + ?Sized> TicketIdGenerator for Arc<G> {
    fn new_ticket_id(&self, prefix: &str) -> TicketId {
        (**self).new_ticket_id(prefix)
    }
}

/// Default generator: counter plus OS randomness.
#[derive(Debug)]
pub struct DefaultTicketIdGenerator {
    counter: AtomicU64,
    random_bytes: usize,
    suffix: Option<String>,
}

impl DefaultTicketIdGenerator {
    /// Create a generator from configuration.
    ///
    /// Lengths below the minimum are raised to it.
    #[must_use]
    pub fn new(config: &TicketIdConfig) -> Self {
        Self {
            counter: AtomicU64::new(1),
            random_bytes: config.random_bytes.max(MIN_TICKET_ID_RANDOM_BYTES),
            suffix: config.suffix.clone().filter(|s| !s.is_empty()),
        }
    }

    fn random_part(&self) -> String {
        let mut bytes = vec![0_u8; self.random_bytes];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

impl Default for DefaultTicketIdGenerator {
    fn default() -> Self {
        Self::new(&TicketIdConfig::default())
    }
}

impl TicketIdGenerator for DefaultTicketIdGenerator {
    fn new_ticket_id(&self, prefix: &str) -> TicketId {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let random = self.random_part();
        let id = match &self.suffix {
            Some(suffix) => format!("{prefix}-{sequence}-{random}-{suffix}"),
            None => format!("{prefix}-{sequence}-{random}"),
        };
        TicketId::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::prefixes;
    use crate::ticket::TicketKind;
    use std::collections::HashSet;

    #[test]
    fn test_id_shape() {
        let generator = DefaultTicketIdGenerator::default();
        let id = generator.new_ticket_id(prefixes::SERVICE_TICKET);

        assert!(id.as_str().starts_with("ST-1-"));
        assert_eq!(id.kind(), Some(TicketKind::Service));
        // 20 bytes -> 27 base64url characters.
        assert_eq!(id.as_str().len(), "ST-1-".len() + 27);
    }

    #[test]
    fn test_suffix_is_appended() {
        let generator =
            DefaultTicketIdGenerator::new(&TicketIdConfig::default().with_suffix("node-a"));
        let id = generator.new_ticket_id(prefixes::TICKET_GRANTING_TICKET);
        assert!(id.as_str().ends_with("-node-a"));
        assert_eq!(id.prefix(), "TGT");
    }

    #[test]
    fn test_short_length_is_raised_to_minimum() {
        let generator =
            DefaultTicketIdGenerator::new(&TicketIdConfig::default().with_random_bytes(4));
        let id = generator.new_ticket_id("PT");
        assert_eq!(id.as_str().len(), "PT-1-".len() + 27);
    }

    #[test]
    fn test_ids_are_unique() {
        let generator = DefaultTicketIdGenerator::default();
        let ids: HashSet<_> = (0..1_000)
            .map(|_| generator.new_ticket_id(prefixes::SERVICE_TICKET))
            .collect();
        assert_eq!(ids.len(), 1_000);
    }
}
