//! Per-client request log.

use std::collections::VecDeque;

/// The accepted request instants for one client key.
///
/// Timestamps are kept in ascending order. The `blocked` flag caches the
/// result of the last admission check and is recomputed on every check,
/// so it never carries information the timestamps do not.
#[derive(Debug, Default, Clone)]
pub struct RequestLog {
    /// Accepted request instants, oldest first
    timestamps: VecDeque<i64>,
    /// Outcome of the most recent admission check
    blocked: bool,
}

impl RequestLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every timestamp at or before `window_start`.
    ///
    /// Returns the number of timestamps that remain.
    pub fn slide(&mut self, window_start: i64) -> usize {
        while let Some(&oldest) = self.timestamps.front() {
            if oldest > window_start {
                break;
            }
            self.timestamps.pop_front();
        }
        self.timestamps.len()
    }

    /// Slide the window and decide whether another request fits.
    ///
    /// Updates the blocked flag and returns `true` when admitted.
    pub fn evaluate(&mut self, window_start: i64, max_requests: u32) -> bool {
        let active = self.slide(window_start);
        self.blocked = active >= max_requests as usize;
        !self.blocked
    }

    /// Append an accepted request instant.
    ///
    /// An instant earlier than the newest entry is clamped to it so the
    /// log stays ordered even if the clock steps backwards.
    pub fn push(&mut self, now: i64) {
        let at = match self.timestamps.back() {
            Some(&newest) if newest > now => newest,
            _ => now,
        };
        self.timestamps.push_back(at);
    }

    /// Number of retained timestamps.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the log holds no timestamps.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Whether the last admission check denied this key.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// The newest retained instant, if any.
    pub fn newest(&self) -> Option<i64> {
        self.timestamps.back().copied()
    }
}
