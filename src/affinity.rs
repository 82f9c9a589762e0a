use crate::backend::Mood;
use crate::config::AffinityConfig;

/// Bounded bond score between player and companion.
///
/// Mutated only by the engine after an accepted interaction; every mutation
/// clamps back into the configured bounds.
pub struct AffinityScore {
    value: i32,
    start: i32,
    min: i32,
    max: i32,
}

impl AffinityScore {
    pub fn new(config: &AffinityConfig) -> Self {
        Self {
            value: config.start.clamp(config.min, config.max),
            start: config.start,
            min: config.min,
            max: config.max,
        }
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    /// Apply the mood's delta and return the new value.
    pub fn apply(&mut self, mood: Mood) -> i32 {
        self.value = (self.value + mood_delta(mood)).clamp(self.min, self.max);
        self.value
    }

    pub fn reset(&mut self) {
        self.value = self.start.clamp(self.min, self.max);
    }

    /// Baseline mood implied by the current bond, before recent remarks are
    /// taken into account.
    pub fn base_mood(&self) -> Mood {
        let span = (self.max - self.min).max(1);
        let pct = ((self.value - self.min) * 100) / span;
        if pct >= 70 {
            Mood::Excited
        } else if pct >= 40 {
            Mood::Encouraging
        } else if pct >= 20 {
            Mood::Neutral
        } else {
            Mood::Serious
        }
    }
}

/// How much each emitted mood moves the bond.
fn mood_delta(mood: Mood) -> i32 {
    match mood {
        Mood::Excited | Mood::Impressed => 2,
        Mood::Encouraging | Mood::Serious => 1,
        Mood::Neutral => 0,
        Mood::Tired | Mood::Mocking => -1,
    }
}
