//! Canned-line backend. Always local, always fast; the last line of defense
//! when remote generation is unavailable.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{Backend, GenerateRequest, Mood, Response, ResponseSource};
use crate::error::GenerateError;
use crate::trigger::{MilestoneKind, RemarkHint, TriggerCategory};

struct Line {
    text: &'static str,
    mood: Mood,
}

const fn line(text: &'static str, mood: Mood) -> Line {
    Line { text, mood }
}

fn lines_for(category: TriggerCategory) -> &'static [Line] {
    match category {
        TriggerCategory::Combo => const {
            &[
                line("{combo} hits and counting. Keep the rhythm!", Mood::Excited),
                line("That chain is pure momentum. {combo} straight!", Mood::Excited),
                line("Don't blink now, the combo's alive at {combo}.", Mood::Encouraging),
                line(
                    "A {combo}-hit streak. I'd clap, but I'm holding the towel.",
                    Mood::Mocking,
                ),
            ]
        },
        TriggerCategory::Crit => const {
            &[
                line("Critical! {damage} damage, straight through the guard!", Mood::Excited),
                line("That one landed where it hurts. {damage}!", Mood::Impressed),
                line("A clean opening and you took it. {damage} damage.", Mood::Impressed),
            ]
        },
        TriggerCategory::LevelUp => const {
            &[
                line("Level {level}! The grind pays off.", Mood::Excited),
                line("Level {level} already? Save some glory for the rest of us.", Mood::Mocking),
                line("Stronger every round. Welcome to level {level}.", Mood::Impressed),
            ]
        },
        TriggerCategory::LowHp => const {
            &[
                line("They're wobbling! Finish it!", Mood::Excited),
                line("Enemy's on their last legs. Press the advantage!", Mood::Encouraging),
                line("Smell that? That's almost-victory. Push!", Mood::Encouraging),
            ]
        },
        TriggerCategory::LowStamina => const {
            &[
                line("Breathe. {stamina} stamina won't carry a brawl.", Mood::Serious),
                line("Ease off a beat and let your legs come back.", Mood::Encouraging),
                line("You're running on fumes. Pick your swings.", Mood::Serious),
            ]
        },
        TriggerCategory::Milestone => const {
            &[
                line("New personal best. Remember how this feels.", Mood::Impressed),
                line("Records exist to be broken, and you just broke yours.", Mood::Impressed),
                line("The {location} will remember that one.", Mood::Impressed),
            ]
        },
        TriggerCategory::Pattern => const {
            &[
                line("All that swinging and nothing to show for it. Slow down.", Mood::Serious),
                line("You're telegraphing. Mix it up.", Mood::Serious),
                line("The air surrenders! The enemy, not so much.", Mood::Mocking),
            ]
        },
    }
}

struct RuleState {
    rng: SmallRng,
    last_pick: HashMap<TriggerCategory, usize>,
}

/// Deterministic template backend: picks a line for the winning category,
/// fills in the numbers, and never repeats the same line twice in a row
/// for the same category.
pub struct RuleBackend {
    state: Mutex<RuleState>,
}

impl RuleBackend {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_rng(&mut rand::rng()))
    }

    /// Fixed-seed variant for reproducible sessions.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            state: Mutex::new(RuleState {
                rng,
                last_pick: HashMap::new(),
            }),
        }
    }

    fn pick(&self, category: TriggerCategory, len: usize) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut index = state.rng.random_range(0..len);
        if len > 1 && state.last_pick.get(&category) == Some(&index) {
            index = (index + 1) % len;
        }
        state.last_pick.insert(category, index);
        index
    }

    /// Synchronous core. The engine calls this inline; generation never
    /// leaves the current thread.
    pub fn respond(&self, request: &GenerateRequest) -> Result<Response, GenerateError> {
        let category = request.candidate.category;
        let lines = lines_for(category);
        if lines.is_empty() {
            return Err(GenerateError::NoResponse);
        }
        let chosen = &lines[self.pick(category, lines.len())];
        let text = render(chosen.text, request);
        debug!(%category, backend = "rules", "rendered canned line");
        Ok(Response {
            text,
            mood: chosen.mood,
            priority: request.candidate.priority,
            source: ResponseSource::RuleBased,
        })
    }
}

impl Default for RuleBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn render(template: &str, request: &GenerateRequest) -> String {
    let snapshot = &request.snapshot;
    let mut combo = snapshot.combo_count;
    let mut damage = snapshot.recent_damage;
    let mut level = snapshot.player_level;
    let mut stamina = snapshot.player_stamina;
    match request.candidate.hint {
        RemarkHint::Combo(n) => combo = n,
        RemarkHint::Crit { damage: hit } => damage = hit,
        RemarkHint::LevelUp { level: reached } => level = reached,
        RemarkHint::Stamina(left) => stamina = left,
        RemarkHint::Milestone(MilestoneKind::BestCombo(n)) => combo = n,
        RemarkHint::Milestone(MilestoneKind::BestDamage(hit)) => damage = hit,
        RemarkHint::EnemyHp(_) | RemarkHint::Pattern(_) => {}
    }
    template
        .replace("{combo}", &combo.to_string())
        .replace("{damage}", &damage.to_string())
        .replace("{level}", &level.to_string())
        .replace("{stamina}", &stamina.to_string())
        .replace("{location}", &snapshot.location)
}

impl Backend for RuleBackend {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn source(&self) -> ResponseSource {
        ResponseSource::RuleBased
    }

    fn generate<'a>(
        &'a self,
        request: &'a GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Response, GenerateError>> + Send + 'a>> {
        Box::pin(async move { self.respond(request) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextSnapshot;
    use crate::history::PlayerStats;
    use crate::persona;
    use crate::trigger::TriggerCandidate;
    use std::time::Duration;

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot {
            player_level: 7,
            player_stamina: 64,
            combo_count: 15,
            attack_power: 42,
            crit_landed: false,
            leveled_up: false,
            enemy_hp_percent: 0.8,
            recent_damage: 33,
            since_last_remark: Duration::from_secs(9),
            location: "training yard".into(),
            affinity: 10,
            stats: PlayerStats::default(),
        }
    }

    fn request(category: TriggerCategory, hint: RemarkHint) -> GenerateRequest {
        GenerateRequest {
            candidate: TriggerCandidate {
                category,
                priority: 50,
                hint,
            },
            snapshot: snapshot(),
            persona: persona::HYPE,
        }
    }

    fn all_requests() -> Vec<GenerateRequest> {
        vec![
            request(TriggerCategory::Combo, RemarkHint::Combo(15)),
            request(TriggerCategory::Crit, RemarkHint::Crit { damage: 61 }),
            request(TriggerCategory::LevelUp, RemarkHint::LevelUp { level: 8 }),
            request(TriggerCategory::LowHp, RemarkHint::EnemyHp(0.2)),
            request(TriggerCategory::LowStamina, RemarkHint::Stamina(12)),
            request(
                TriggerCategory::Milestone,
                RemarkHint::Milestone(MilestoneKind::BestCombo(15)),
            ),
            request(
                TriggerCategory::Pattern,
                RemarkHint::Pattern(crate::trigger::PatternKind::WhiffStreak(4)),
            ),
        ]
    }

    #[tokio::test]
    async fn every_category_produces_a_line() {
        let backend = RuleBackend::seeded(7);
        for request in all_requests() {
            let response = backend.generate(&request).await.unwrap();
            assert!(!response.text.is_empty());
            assert_eq!(response.source, ResponseSource::RuleBased);
        }
    }

    #[tokio::test]
    async fn placeholders_are_filled_in() {
        let backend = RuleBackend::seeded(7);
        for request in all_requests() {
            let response = backend.generate(&request).await.unwrap();
            assert!(
                !response.text.contains('{') && !response.text.contains('}'),
                "unresolved placeholder in {:?}",
                response.text
            );
        }
    }

    #[tokio::test]
    async fn hint_value_overrides_snapshot_field() {
        let backend = RuleBackend::seeded(7);
        let request = request(TriggerCategory::Crit, RemarkHint::Crit { damage: 61 });
        // Snapshot says 33, the hint says 61; the hint is what the detector saw.
        for _ in 0..8 {
            let response = backend.generate(&request).await.unwrap();
            assert!(!response.text.contains("33"));
        }
    }

    #[tokio::test]
    async fn priority_is_copied_from_the_candidate() {
        let backend = RuleBackend::seeded(7);
        let mut request = request(TriggerCategory::Combo, RemarkHint::Combo(15));
        request.candidate.priority = 88;
        let response = backend.generate(&request).await.unwrap();
        assert_eq!(response.priority, 88);
    }

    #[tokio::test]
    async fn mood_follows_the_chosen_template() {
        let backend = RuleBackend::seeded(7);
        let request = request(
            TriggerCategory::Milestone,
            RemarkHint::Milestone(MilestoneKind::BestDamage(70)),
        );
        // Every milestone line carries the same mood, so the draw can't hide it.
        let response = backend.generate(&request).await.unwrap();
        assert_eq!(response.mood, Mood::Impressed);
    }

    #[tokio::test]
    async fn consecutive_calls_avoid_repeating_a_line() {
        let backend = RuleBackend::seeded(7);
        let request = request(TriggerCategory::Combo, RemarkHint::Combo(15));
        let mut previous = backend.generate(&request).await.unwrap().text;
        for _ in 0..16 {
            let next = backend.generate(&request).await.unwrap().text;
            assert_ne!(next, previous);
            previous = next;
        }
    }

    #[tokio::test]
    async fn repeat_guard_is_per_category() {
        let backend = RuleBackend::seeded(7);
        let combo = request(TriggerCategory::Combo, RemarkHint::Combo(15));
        let pattern = request(
            TriggerCategory::Pattern,
            RemarkHint::Pattern(crate::trigger::PatternKind::WhiffStreak(4)),
        );
        // Interleaving categories must not disturb either guard.
        let mut last_combo = backend.generate(&combo).await.unwrap().text;
        let mut last_pattern = backend.generate(&pattern).await.unwrap().text;
        for _ in 0..8 {
            let next_combo = backend.generate(&combo).await.unwrap().text;
            let next_pattern = backend.generate(&pattern).await.unwrap().text;
            assert_ne!(next_combo, last_combo);
            assert_ne!(next_pattern, last_pattern);
            last_combo = next_combo;
            last_pattern = next_pattern;
        }
    }
}
