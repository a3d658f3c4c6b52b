//! Per-session delivery bookkeeping.

use tracing::warn;

/// Highest sequence a session has been sent.
///
/// Deliveries to one session only ever move forward. Replayed and live
/// entries can overlap, so anything at or below the watermark is a repeat
/// and is suppressed. Marking a sequence past a hole gives the hole up for
/// good: entries below it are never sent to this session afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryCursor {
    last_delivered: i64,
}

impl DeliveryCursor {
    /// Cursor for a session that has already seen everything up to `start`.
    pub fn new(start: i64) -> Self {
        Self {
            last_delivered: start,
        }
    }

    /// Record `sequence` as delivered.
    ///
    /// Returns `false` if it is at or below the watermark and must be
    /// suppressed.
    pub fn mark(&mut self, sequence: i64) -> bool {
        if sequence <= self.last_delivered {
            return false;
        }
        if sequence > self.last_delivered + 1 {
            warn!(
                from = self.last_delivered + 1,
                to = sequence - 1,
                "Abandoning sequence gap"
            );
        }
        self.last_delivered = sequence;
        true
    }

    /// Whether `sequence` directly follows the watermark.
    pub fn is_next(&self, sequence: i64) -> bool {
        sequence == self.last_delivered + 1
    }

    pub fn is_delivered(&self, sequence: i64) -> bool {
        sequence <= self.last_delivered
    }

    pub fn last_delivered(&self) -> i64 {
        self.last_delivered
    }
}
