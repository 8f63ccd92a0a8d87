//! Fixed-window request quota for direct messages.
//!
//! All senders share one window: when it elapses the whole map is cleared at
//! once. A request that would push a sender past the ceiling is rejected and
//! leaves the count untouched.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-sender request counter with a single process-wide reset clock.
#[derive(Debug)]
pub struct QuotaTracker {
    limit: u32,
    window: Duration,
    window_start: Instant,
    counts: HashMap<String, u32>,
}

impl QuotaTracker {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::starting_at(limit, window, Instant::now())
    }

    /// Create a tracker whose first window opens at `start`.
    pub fn starting_at(limit: u32, window: Duration, start: Instant) -> Self {
        Self {
            limit,
            window,
            window_start: start,
            counts: HashMap::new(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count `increment` requests from `sender`. Returns whether they are allowed.
    pub fn record_request(&mut self, sender: &str, increment: u32) -> bool {
        self.record_request_at(sender, increment, Instant::now())
    }

    pub fn record_request_at(&mut self, sender: &str, increment: u32, now: Instant) -> bool {
        self.roll_window(now);

        let current = self.count(sender);
        let prospective = current.saturating_add(increment);

        tracing::info!(
            sender,
            requested = increment,
            remaining = self.limit.saturating_sub(current),
            window_secs_left = self.remaining_window_at(now).as_secs(),
            "direct message quota check"
        );

        if prospective > self.limit {
            tracing::warn!(sender, limit = self.limit, "sender exceeded their request quota");
            return false;
        }

        self.counts.insert(sender.to_string(), prospective);
        true
    }

    /// Whether `increment` more requests from `sender` would be allowed.
    /// Rolls the window but never counts anything.
    pub fn would_allow(&mut self, sender: &str, increment: u32) -> bool {
        self.would_allow_at(sender, increment, Instant::now())
    }

    pub fn would_allow_at(&mut self, sender: &str, increment: u32, now: Instant) -> bool {
        self.roll_window(now);
        self.count(sender).saturating_add(increment) <= self.limit
    }

    /// Requests counted for `sender` in the current window.
    pub fn count(&self, sender: &str) -> u32 {
        self.counts.get(sender).copied().unwrap_or(0)
    }

    pub fn remaining(&self, sender: &str) -> u32 {
        self.limit.saturating_sub(self.count(sender))
    }

    /// Seconds until every counter resets.
    pub fn seconds_remaining(&self) -> u64 {
        self.remaining_window_at(Instant::now()).as_secs()
    }

    pub fn remaining_window_at(&self, now: Instant) -> Duration {
        self.window
            .saturating_sub(now.saturating_duration_since(self.window_start))
    }

    fn roll_window(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= self.window {
            if !self.counts.is_empty() {
                tracing::info!(
                    senders = self.counts.len(),
                    "quota window elapsed, resetting counters"
                );
            }
            self.counts.clear();
            self.window_start = now;
        }
    }
}
