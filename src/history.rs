use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;
use strum::Display;

/// A single recorded combat action, fed by the host as events happen.
#[derive(Debug, Clone, Copy)]
pub struct ActionRecord {
    pub kind: ActionKind,
    pub at: Instant,
    /// Combo length at the moment of the action.
    pub combo: u32,
    /// Damage dealt by the action, 0 where not applicable.
    pub damage: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Attack,
    Crit,
    ComboBreak,
    EnemyDefeated,
    LevelUp,
    Exhausted,
    /// A missed or otherwise failed action.
    Whiff,
}

impl ActionKind {
    fn is_attack(self) -> bool {
        matches!(self, Self::Attack | Self::Crit)
    }
}

/// Deterministic aggregates derived from the buffer contents.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PlayerStats {
    /// Attacks per second across the buffered span.
    pub attack_rate: f32,
    /// Share of attacks that landed critically.
    pub crit_rate: f32,
    /// Share of attacks thrown while a combo was alive.
    pub combo_tendency: f32,
    pub best_combo: u32,
    pub best_damage: u32,
}

/// Fixed-capacity FIFO of recent actions plus session bests.
///
/// Bests are running scalars that survive eviction, and they advance only
/// through [`absorb_bests`](Self::absorb_bests) — pushing records never moves
/// them. The engine absorbs each evaluated snapshot after trigger detection,
/// so a record the host pushes mid-frame cannot mask its own detection.
pub struct HistoryBuffer {
    entries: VecDeque<ActionRecord>,
    capacity: usize,
    best_combo: u32,
    best_damage: u32,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            best_combo: 0,
            best_damage: 0,
        }
    }

    /// Append a record, evicting the oldest once capacity is reached.
    pub fn push(&mut self, record: ActionRecord) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    /// Advance session bests from an evaluated snapshot.
    pub fn absorb_bests(&mut self, combo: u32, damage: u32) {
        self.best_combo = self.best_combo.max(combo);
        self.best_damage = self.best_damage.max(damage);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionRecord> {
        self.entries.iter()
    }

    /// Count of consecutive whiffs at the tail of the buffer.
    pub fn failed_streak(&self) -> u32 {
        let mut streak = 0;
        for record in self.entries.iter().rev() {
            if record.kind == ActionKind::Whiff {
                streak += 1;
            } else {
                break;
            }
        }
        streak
    }

    /// Derive play-style aggregates. Same contents always produce the same
    /// stats; no clock is consulted.
    pub fn stats(&self) -> PlayerStats {
        let mut attacks = 0u32;
        let mut crits = 0u32;
        let mut in_combo = 0u32;
        let mut first_attack: Option<Instant> = None;
        let mut last_attack: Option<Instant> = None;

        for record in &self.entries {
            if !record.kind.is_attack() {
                continue;
            }
            attacks += 1;
            if record.kind == ActionKind::Crit {
                crits += 1;
            }
            if record.combo >= 2 {
                in_combo += 1;
            }
            if first_attack.is_none() {
                first_attack = Some(record.at);
            }
            last_attack = Some(record.at);
        }

        let attack_rate = match (first_attack, last_attack) {
            (Some(first), Some(last)) if attacks > 1 => {
                let span = last.saturating_duration_since(first).as_secs_f32();
                if span > 0.0 {
                    (attacks - 1) as f32 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        let (crit_rate, combo_tendency) = if attacks > 0 {
            (crits as f32 / attacks as f32, in_combo as f32 / attacks as f32)
        } else {
            (0.0, 0.0)
        };

        PlayerStats {
            attack_rate,
            crit_rate,
            combo_tendency,
            best_combo: self.best_combo,
            best_damage: self.best_damage,
        }
    }

    /// Drop all records and forget session bests.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.best_combo = 0;
        self.best_damage = 0;
    }
}
