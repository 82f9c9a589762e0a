use crate::config::TriggerRules;
use crate::context::ContextSnapshot;
use crate::history::HistoryBuffer;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What kind of moment a candidate wants to remark on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerCategory {
    Combo,
    Crit,
    LevelUp,
    /// Enemy close to defeat.
    LowHp,
    LowStamina,
    /// New session best (combo length or single-hit damage).
    Milestone,
    /// Repeated failure pattern in recent history.
    Pattern,
}

/// Payload a backend needs to render the remark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemarkHint {
    Combo(u32),
    Crit { damage: u32 },
    LevelUp { level: u32 },
    EnemyHp(f32),
    Stamina(u32),
    Milestone(MilestoneKind),
    Pattern(PatternKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneKind {
    BestCombo(u32),
    BestDamage(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    WhiffStreak(u32),
}

/// One reason to speak this cycle, before arbitration.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerCandidate {
    pub category: TriggerCategory,
    pub priority: u8,
    pub hint: RemarkHint,
}

/// Config-driven threshold and pattern rules.
///
/// Detection is a pure function of its inputs: no I/O, no clock reads, no
/// mutation. The same snapshot and history always produce the same
/// candidates in the same order.
pub struct TriggerDetector {
    rules: TriggerRules,
}

impl TriggerDetector {
    pub fn new(rules: TriggerRules) -> Self {
        Self { rules }
    }

    pub fn detect(
        &self,
        snapshot: &ContextSnapshot,
        history: &HistoryBuffer,
    ) -> Vec<TriggerCandidate> {
        let mut candidates = Vec::new();

        // Highest combo tier reached supplies the priority.
        if let Some(tier) = self
            .rules
            .combo_tiers
            .iter()
            .rev()
            .find(|tier| snapshot.combo_count >= tier.at)
        {
            candidates.push(TriggerCandidate {
                category: TriggerCategory::Combo,
                priority: tier.priority,
                hint: RemarkHint::Combo(snapshot.combo_count),
            });
        }

        if snapshot.crit_landed {
            candidates.push(TriggerCandidate {
                category: TriggerCategory::Crit,
                priority: self.rules.priorities.crit,
                hint: RemarkHint::Crit {
                    damage: snapshot.recent_damage,
                },
            });
        }

        if snapshot.leveled_up {
            candidates.push(TriggerCandidate {
                category: TriggerCategory::LevelUp,
                priority: self.rules.priorities.level_up,
                hint: RemarkHint::LevelUp {
                    level: snapshot.player_level,
                },
            });
        }

        // 0.0 means the enemy is already down; that's the host's moment, not ours.
        if snapshot.enemy_hp_percent > 0.0 && snapshot.enemy_hp_percent < self.rules.enemy_hp_below
        {
            candidates.push(TriggerCandidate {
                category: TriggerCategory::LowHp,
                priority: self.rules.priorities.low_hp,
                hint: RemarkHint::EnemyHp(snapshot.enemy_hp_percent),
            });
        }

        if snapshot.player_stamina < self.rules.stamina_below {
            candidates.push(TriggerCandidate {
                category: TriggerCategory::LowStamina,
                priority: self.rules.priorities.low_stamina,
                hint: RemarkHint::Stamina(snapshot.player_stamina),
            });
        }

        if let Some(kind) = self.milestone(snapshot) {
            candidates.push(TriggerCandidate {
                category: TriggerCategory::Milestone,
                priority: self.rules.priorities.milestone,
                hint: RemarkHint::Milestone(kind),
            });
        }

        let streak = history.failed_streak();
        if streak >= self.rules.whiff_streak {
            candidates.push(TriggerCandidate {
                category: TriggerCategory::Pattern,
                priority: self.rules.priorities.pattern,
                hint: RemarkHint::Pattern(PatternKind::WhiffStreak(streak)),
            });
        }

        candidates
    }

    /// A milestone requires strictly beating the session best, at or above
    /// the configured floor. Combo records outrank damage records when both
    /// land in the same cycle.
    fn milestone(&self, snapshot: &ContextSnapshot) -> Option<MilestoneKind> {
        if snapshot.combo_count > snapshot.stats.best_combo
            && snapshot.combo_count >= self.rules.milestone_combo_floor
        {
            return Some(MilestoneKind::BestCombo(snapshot.combo_count));
        }
        if snapshot.recent_damage > snapshot.stats.best_damage
            && snapshot.recent_damage >= self.rules.milestone_damage_floor
        {
            return Some(MilestoneKind::BestDamage(snapshot.recent_damage));
        }
        None
    }
}
