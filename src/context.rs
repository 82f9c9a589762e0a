use crate::history::PlayerStats;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Read-only view of live combat state, implemented by the host game.
///
/// The engine never sees concrete entity types; everything it can observe
/// about the player and the current fight comes through these accessors.
/// Flag accessors (`crit_landed`, `leveled_up`) report events since the
/// previous evaluation cycle.
pub trait CombatView {
    fn player_level(&self) -> u32;
    fn player_stamina(&self) -> u32;
    fn combo_count(&self) -> u32;
    fn attack_power(&self) -> u32;
    fn crit_landed(&self) -> bool;
    fn leveled_up(&self) -> bool;
    /// Remaining enemy hp as a fraction of its maximum, 0.0–1.0.
    fn enemy_hp_percent(&self) -> f32;
    /// Damage dealt by the most recent hit.
    fn recent_damage(&self) -> u32;
    /// Scene or arena tag, e.g. "training_grounds".
    fn location(&self) -> &str;
}

/// Immutable per-cycle capture of everything downstream stages may read.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub player_level: u32,
    pub player_stamina: u32,
    pub combo_count: u32,
    pub attack_power: u32,
    pub crit_landed: bool,
    pub leveled_up: bool,
    pub enemy_hp_percent: f32,
    pub recent_damage: u32,
    pub since_last_remark: Duration,
    pub location: String,
    pub affinity: i32,
    pub stats: PlayerStats,
}

/// Builds snapshots and remembers when the companion last spoke.
pub struct ContextBuilder {
    started_at: Instant,
    last_remark_at: Option<Instant>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            last_remark_at: None,
        }
    }

    /// Capture the current cycle's snapshot. Pure with respect to the host:
    /// reads the view, never mutates it, never blocks.
    pub fn build(
        &self,
        view: &dyn CombatView,
        now: Instant,
        affinity: i32,
        stats: PlayerStats,
    ) -> ContextSnapshot {
        ContextSnapshot {
            player_level: view.player_level(),
            player_stamina: view.player_stamina(),
            combo_count: view.combo_count(),
            attack_power: view.attack_power(),
            crit_landed: view.crit_landed(),
            leveled_up: view.leveled_up(),
            enemy_hp_percent: view.enemy_hp_percent(),
            recent_damage: view.recent_damage(),
            since_last_remark: self.since_last_remark(now),
            location: view.location().to_string(),
            affinity,
            stats,
        }
    }

    /// Time since the last emitted remark; before the first remark this is
    /// the engine's age, so silence-based logic still has a sane baseline.
    pub fn since_last_remark(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_remark_at.unwrap_or(self.started_at))
    }

    /// Record that a remark was emitted at `now`.
    pub fn mark_remark(&mut self, now: Instant) {
        self.last_remark_at = Some(now);
    }

    /// Forget the remark history (used by a full engine reset).
    pub fn clear(&mut self) {
        self.last_remark_at = None;
        self.started_at = Instant::now();
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedView {
        combo: u32,
        stamina: u32,
        crit: bool,
    }

    impl CombatView for FixedView {
        fn player_level(&self) -> u32 {
            7
        }
        fn player_stamina(&self) -> u32 {
            self.stamina
        }
        fn combo_count(&self) -> u32 {
            self.combo
        }
        fn attack_power(&self) -> u32 {
            42
        }
        fn crit_landed(&self) -> bool {
            self.crit
        }
        fn leveled_up(&self) -> bool {
            false
        }
        fn enemy_hp_percent(&self) -> f32 {
            0.65
        }
        fn recent_damage(&self) -> u32 {
            18
        }
        fn location(&self) -> &str {
            "training_grounds"
        }
    }

    #[test]
    fn build_copies_all_view_fields() {
        let builder = ContextBuilder::new();
        let view = FixedView {
            combo: 9,
            stamina: 55,
            crit: true,
        };
        let snapshot = builder.build(&view, Instant::now(), 12, PlayerStats::default());

        assert_eq!(snapshot.player_level, 7);
        assert_eq!(snapshot.player_stamina, 55);
        assert_eq!(snapshot.combo_count, 9);
        assert_eq!(snapshot.attack_power, 42);
        assert!(snapshot.crit_landed);
        assert!(!snapshot.leveled_up);
        assert_eq!(snapshot.recent_damage, 18);
        assert_eq!(snapshot.location, "training_grounds");
        assert_eq!(snapshot.affinity, 12);
    }

    #[test]
    fn since_last_remark_tracks_marks() {
        let mut builder = ContextBuilder::new();
        let start = Instant::now();

        builder.mark_remark(start);
        let later = start + Duration::from_secs(5);
        assert_eq!(builder.since_last_remark(later), Duration::from_secs(5));

        builder.mark_remark(later);
        assert_eq!(builder.since_last_remark(later), Duration::ZERO);
    }

    #[test]
    fn before_first_remark_uses_engine_age() {
        let builder = ContextBuilder::new();
        let later = Instant::now() + Duration::from_secs(30);
        assert!(builder.since_last_remark(later) >= Duration::from_secs(30));
    }

    #[test]
    fn clear_forgets_last_remark() {
        let mut builder = ContextBuilder::new();
        let now = Instant::now();
        builder.mark_remark(now);
        builder.clear();
        // After a reset the baseline is the new start, not the old remark.
        assert!(builder.since_last_remark(now + Duration::from_secs(1)) <= Duration::from_secs(2));
    }
}
