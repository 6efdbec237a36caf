use std::fmt;

use serde::{Deserialize, Serialize};

/// Snapshot of the store, by artifact status plus queue sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub queued: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending_requests: usize,
    pub dead_letters: usize,
}

impl StoreCounts {
    pub fn total_artifacts(&self) -> usize {
        self.queued + self.completed + self.failed
    }

    /// Nothing waiting for a sync pass.
    pub fn is_drained(&self) -> bool {
        self.pending_requests == 0
    }
}

impl fmt::Display for StoreCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queued={} completed={} failed={} pending_requests={} dead_letters={}",
            self.queued, self.completed, self.failed, self.pending_requests, self.dead_letters
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_every_count() {
        let counts = StoreCounts {
            queued: 1,
            completed: 2,
            failed: 3,
            pending_requests: 1,
            dead_letters: 3,
        };
        assert_eq!(
            counts.to_string(),
            "queued=1 completed=2 failed=3 pending_requests=1 dead_letters=3"
        );
        assert_eq!(counts.total_artifacts(), 6);
        assert!(!counts.is_drained());
    }
}
