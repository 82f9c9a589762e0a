use crate::config::ArbiterConfig;
use crate::trigger::{TriggerCandidate, TriggerCategory};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks when remarks were last accepted, globally and per category.
///
/// The clock is injected: callers pass the cycle's `now` so suppression
/// decisions are reproducible in tests without sleeping.
pub struct CooldownState {
    last_global: Option<Instant>,
    last_by_category: HashMap<TriggerCategory, Instant>,
}

impl CooldownState {
    pub fn new() -> Self {
        Self {
            last_global: None,
            last_by_category: HashMap::new(),
        }
    }

    /// Record an acceptance: stamps the global slot and the category slot.
    pub fn stamp(&mut self, category: TriggerCategory, now: Instant) {
        self.last_global = Some(now);
        self.last_by_category.insert(category, now);
    }

    pub fn is_cooling_down_global(&self, now: Instant, window: Duration) -> bool {
        self.last_global
            .is_some_and(|last| now.saturating_duration_since(last) < window)
    }

    pub fn is_cooling_down(
        &self,
        category: TriggerCategory,
        now: Instant,
        window: Duration,
    ) -> bool {
        self.last_by_category
            .get(&category)
            .is_some_and(|last| now.saturating_duration_since(*last) < window)
    }

    /// Remaining category cooldown, or `None` when the category is clear.
    pub fn remaining(
        &self,
        category: TriggerCategory,
        now: Instant,
        window: Duration,
    ) -> Option<Duration> {
        let last = self.last_by_category.get(&category)?;
        let elapsed = now.saturating_duration_since(*last);
        if elapsed < window {
            Some(window - elapsed)
        } else {
            None
        }
    }

    /// Forget all stamps (full engine reset).
    pub fn clear(&mut self) {
        self.last_global = None;
        self.last_by_category.clear();
    }
}

impl Default for CooldownState {
    fn default() -> Self {
        Self::new()
    }
}

/// Picks at most one candidate per cycle: cooldown gates first, then highest
/// priority, ties broken by the configured precedence table.
///
/// Cooldowns are stamped at acceptance, before any generation is attempted,
/// so a failed or declined generation still consumes the slot.
pub struct Arbiter {
    config: ArbiterConfig,
}

impl Arbiter {
    pub fn new(config: ArbiterConfig) -> Self {
        Self { config }
    }

    pub fn select(
        &self,
        candidates: Vec<TriggerCandidate>,
        now: Instant,
        cooldowns: &mut CooldownState,
    ) -> Option<TriggerCandidate> {
        if candidates.is_empty() {
            return None;
        }

        if cooldowns.is_cooling_down_global(now, self.config.global_cooldown()) {
            tracing::debug!(
                candidates = candidates.len(),
                "all candidates suppressed by global cooldown"
            );
            return None;
        }

        let mut winner: Option<TriggerCandidate> = None;
        for candidate in candidates {
            let window = self.config.cooldown_secs.for_category(candidate.category);
            if cooldowns.is_cooling_down(candidate.category, now, window) {
                tracing::debug!(
                    category = %candidate.category,
                    remaining_ms = cooldowns
                        .remaining(candidate.category, now, window)
                        .map_or(0, |d| d.as_millis()),
                    "candidate suppressed by category cooldown"
                );
                continue;
            }

            winner = match winner {
                Some(current) if self.outranks(&candidate, &current) => Some(candidate),
                Some(current) => Some(current),
                None => Some(candidate),
            };
        }

        let accepted = winner?;
        cooldowns.stamp(accepted.category, now);
        tracing::debug!(
            category = %accepted.category,
            priority = accepted.priority,
            "candidate accepted"
        );
        Some(accepted)
    }

    /// Strictly higher priority wins; equal priority falls back to the
    /// precedence table, earlier entry first. Equal rank keeps the incumbent,
    /// so selection is stable in detection order.
    fn outranks(&self, challenger: &TriggerCandidate, incumbent: &TriggerCandidate) -> bool {
        if challenger.priority != incumbent.priority {
            return challenger.priority > incumbent.priority;
        }
        self.rank(challenger.category) < self.rank(incumbent.category)
    }

    fn rank(&self, category: TriggerCategory) -> usize {
        self.config
            .precedence
            .iter()
            .position(|entry| *entry == category)
            .unwrap_or(self.config.precedence.len())
    }
}
