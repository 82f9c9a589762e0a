use super::Mood;
use crate::config::MoodKeywords;
use crate::trigger::TriggerCategory;

/// Infers a remark's mood from its wording.
///
/// Each mood owns a keyword list (config-overridable); the mood with the
/// most hits wins, ties going to the earlier table. With no hits at all the
/// candidate category's default mood applies, so classification never fails.
#[derive(Debug)]
pub struct MoodClassifier {
    tables: Vec<(Mood, Vec<String>)>,
}

fn builtin_keywords(mood: Mood) -> &'static [&'static str] {
    match mood {
        Mood::Excited => &[
            "amazing",
            "incredible",
            "unstoppable",
            "on fire",
            "let's go",
            "insane",
        ],
        Mood::Impressed => &[
            "impressive",
            "beautiful",
            "clean",
            "masterful",
            "didn't expect",
            "well done",
        ],
        Mood::Encouraging => &["keep", "almost", "you've got", "stay with", "push", "shake it off"],
        Mood::Mocking => &["call that", "seen better", "my grandmother", "nap", "adorable"],
        Mood::Serious => &["focus", "careful", "watch", "danger", "discipline", "steady"],
        Mood::Tired => &["slow down", "dragging", "exhausted", "yawn", "wake me"],
        Mood::Neutral => &[],
    }
}

/// Moods scanned in fixed order; earlier entries win ties.
const SCAN_ORDER: [Mood; 6] = [
    Mood::Excited,
    Mood::Impressed,
    Mood::Encouraging,
    Mood::Mocking,
    Mood::Serious,
    Mood::Tired,
];

impl MoodClassifier {
    pub fn new(overrides: &MoodKeywords) -> Self {
        let tables = SCAN_ORDER
            .iter()
            .map(|mood| {
                let configured = match mood {
                    Mood::Excited => &overrides.excited,
                    Mood::Impressed => &overrides.impressed,
                    Mood::Encouraging => &overrides.encouraging,
                    Mood::Mocking => &overrides.mocking,
                    Mood::Serious => &overrides.serious,
                    Mood::Tired => &overrides.tired,
                    Mood::Neutral => unreachable!("neutral carries no keywords"),
                };
                let keywords = if configured.is_empty() {
                    builtin_keywords(*mood)
                        .iter()
                        .map(|k| (*k).to_string())
                        .collect()
                } else {
                    configured.iter().map(|k| k.to_lowercase()).collect()
                };
                (*mood, keywords)
            })
            .collect();
        Self { tables }
    }

    pub fn classify(&self, text: &str, fallback: Mood) -> Mood {
        let lower = text.to_lowercase();
        let mut best: Option<(Mood, usize)> = None;
        for (mood, keywords) in &self.tables {
            let score = keywords
                .iter()
                .filter(|keyword| lower.contains(keyword.as_str()))
                .count();
            if score > 0 && best.is_none_or(|(_, s)| score > s) {
                best = Some((*mood, score));
            }
        }
        best.map_or(fallback, |(mood, _)| mood)
    }
}

/// Mood a category implies when the reply text gives no signal.
pub fn default_mood_for(category: TriggerCategory) -> Mood {
    match category {
        TriggerCategory::Combo | TriggerCategory::LevelUp => Mood::Excited,
        TriggerCategory::Crit | TriggerCategory::Milestone => Mood::Impressed,
        TriggerCategory::LowHp | TriggerCategory::LowStamina => Mood::Encouraging,
        TriggerCategory::Pattern => Mood::Serious,
    }
}
