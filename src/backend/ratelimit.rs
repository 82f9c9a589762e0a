use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window request limiter for remote backends.
///
/// Tracks the instants of recent acquisitions; at quota, further requests
/// are rejected locally so no network call is ever attempted for them.
/// The clock is injected by the caller, matching the rest of the cycle.
#[derive(Debug)]
pub struct RateLimiter {
    quota: usize,
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(quota: usize, window: Duration) -> Self {
        Self {
            quota,
            window,
            stamps: VecDeque::with_capacity(quota),
        }
    }

    /// Take a slot at `now`. Returns `false` at quota, recording nothing.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.stamps.len() >= self.quota {
            return false;
        }
        self.stamps.push_back(now);
        true
    }

    /// Slots still available within the current window.
    pub fn remaining(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.quota - self.stamps.len()
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.stamps.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }
}
