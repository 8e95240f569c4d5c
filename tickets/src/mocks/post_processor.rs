//! Recording logout post-processor for testing.

use crate::logout::{LogoutOutcome, LogoutPostProcessor};
use std::sync::{Arc, Mutex, PoisonError};

/// Keeps every outcome it is shown. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingLogoutPostProcessor {
    outcomes: Arc<Mutex<Vec<LogoutOutcome>>>,
}

impl RecordingLogoutPostProcessor {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes seen so far.
    #[must_use]
    pub fn outcomes(&self) -> Vec<LogoutOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LogoutPostProcessor for RecordingLogoutPostProcessor {
    fn process(&self, outcome: &LogoutOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome.clone());
    }
}
