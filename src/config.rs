use crate::backend::BackendSelector;
use crate::error::ConfigError;
use crate::persona::SwitchPolicy;
use crate::trigger::TriggerCategory;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration, loaded once at startup.
///
/// Every section and field has a default, so an empty file (or no file at
/// all) yields a fully working rule-based engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub triggers: TriggerRules,

    #[serde(default)]
    pub arbiter: ArbiterConfig,

    #[serde(default)]
    pub affinity: AffinityConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub moods: MoodKeywords,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default)]
    pub backend: BackendSelector,

    #[serde(default = "default_persona")]
    pub persona: String,

    #[serde(default)]
    pub persona_policy: SwitchPolicy,

    /// Downgrade `Unavailable` remote calls to the rule backend per call.
    #[serde(default = "default_true")]
    pub fallback_to_rules: bool,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_persona() -> String {
    "hype".into()
}

fn default_true() -> bool {
    true
}

fn default_history_capacity() -> usize {
    50
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            backend: BackendSelector::default(),
            persona: default_persona(),
            persona_policy: SwitchPolicy::default(),
            fallback_to_rules: true,
            history_capacity: default_history_capacity(),
        }
    }
}

// ─── Trigger thresholds ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRules {
    /// Combo thresholds, ascending. The highest tier reached supplies the
    /// candidate's priority.
    #[serde(default = "default_combo_tiers")]
    pub combo_tiers: Vec<ComboTier>,

    /// Enemy hp fraction below which the near-death trigger fires.
    #[serde(default = "default_enemy_hp_below")]
    pub enemy_hp_below: f32,

    #[serde(default = "default_stamina_below")]
    pub stamina_below: u32,

    /// Consecutive whiffed actions before the pattern trigger fires.
    #[serde(default = "default_whiff_streak")]
    pub whiff_streak: u32,

    /// A new best combo only counts as a milestone at or above this length.
    #[serde(default = "default_milestone_combo_floor")]
    pub milestone_combo_floor: u32,

    /// A new damage record only counts as a milestone at or above this value.
    #[serde(default = "default_milestone_damage_floor")]
    pub milestone_damage_floor: u32,

    #[serde(default)]
    pub priorities: TriggerPriorities,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComboTier {
    pub at: u32,
    pub priority: u8,
}

fn default_combo_tiers() -> Vec<ComboTier> {
    vec![
        ComboTier {
            at: 8,
            priority: 45,
        },
        ComboTier {
            at: 15,
            priority: 50,
        },
    ]
}

fn default_enemy_hp_below() -> f32 {
    0.30
}

fn default_stamina_below() -> u32 {
    30
}

fn default_whiff_streak() -> u32 {
    4
}

fn default_milestone_combo_floor() -> u32 {
    10
}

fn default_milestone_damage_floor() -> u32 {
    25
}

impl Default for TriggerRules {
    fn default() -> Self {
        Self {
            combo_tiers: default_combo_tiers(),
            enemy_hp_below: default_enemy_hp_below(),
            stamina_below: default_stamina_below(),
            whiff_streak: default_whiff_streak(),
            milestone_combo_floor: default_milestone_combo_floor(),
            milestone_damage_floor: default_milestone_damage_floor(),
            priorities: TriggerPriorities::default(),
        }
    }
}

/// Base priorities per category. Combo priority comes from its tier instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerPriorities {
    #[serde(default = "default_crit_priority")]
    pub crit: u8,
    #[serde(default = "default_level_up_priority")]
    pub level_up: u8,
    #[serde(default = "default_low_hp_priority")]
    pub low_hp: u8,
    #[serde(default = "default_low_stamina_priority")]
    pub low_stamina: u8,
    #[serde(default = "default_milestone_priority")]
    pub milestone: u8,
    #[serde(default = "default_pattern_priority")]
    pub pattern: u8,
}

fn default_crit_priority() -> u8 {
    80
}

fn default_level_up_priority() -> u8 {
    90
}

fn default_low_hp_priority() -> u8 {
    60
}

fn default_low_stamina_priority() -> u8 {
    30
}

fn default_milestone_priority() -> u8 {
    70
}

fn default_pattern_priority() -> u8 {
    35
}

impl Default for TriggerPriorities {
    fn default() -> Self {
        Self {
            crit: default_crit_priority(),
            level_up: default_level_up_priority(),
            low_hp: default_low_hp_priority(),
            low_stamina: default_low_stamina_priority(),
            milestone: default_milestone_priority(),
            pattern: default_pattern_priority(),
        }
    }
}

// ─── Arbitration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterConfig {
    /// Minimum spacing between any two remarks.
    #[serde(default = "default_global_cooldown_secs")]
    pub global_cooldown_secs: u64,

    #[serde(default)]
    pub cooldown_secs: CategoryCooldowns,

    /// Tie-break order for candidates with equal priority; earlier wins.
    /// Categories missing from the list rank after every listed one.
    #[serde(default = "default_precedence")]
    pub precedence: Vec<TriggerCategory>,
}

fn default_global_cooldown_secs() -> u64 {
    2
}

fn default_precedence() -> Vec<TriggerCategory> {
    vec![
        TriggerCategory::LevelUp,
        TriggerCategory::Crit,
        TriggerCategory::Milestone,
        TriggerCategory::LowHp,
        TriggerCategory::Combo,
        TriggerCategory::Pattern,
        TriggerCategory::LowStamina,
    ]
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            global_cooldown_secs: default_global_cooldown_secs(),
            cooldown_secs: CategoryCooldowns::default(),
            precedence: default_precedence(),
        }
    }
}

impl ArbiterConfig {
    pub fn global_cooldown(&self) -> Duration {
        Duration::from_secs(self.global_cooldown_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCooldowns {
    #[serde(default = "default_combo_cooldown")]
    pub combo: u64,
    #[serde(default = "default_crit_cooldown")]
    pub crit: u64,
    #[serde(default = "default_level_up_cooldown")]
    pub level_up: u64,
    #[serde(default = "default_low_hp_cooldown")]
    pub low_hp: u64,
    #[serde(default = "default_low_stamina_cooldown")]
    pub low_stamina: u64,
    #[serde(default = "default_milestone_cooldown")]
    pub milestone: u64,
    #[serde(default = "default_pattern_cooldown")]
    pub pattern: u64,
}

fn default_combo_cooldown() -> u64 {
    5
}

fn default_crit_cooldown() -> u64 {
    4
}

fn default_level_up_cooldown() -> u64 {
    10
}

fn default_low_hp_cooldown() -> u64 {
    6
}

fn default_low_stamina_cooldown() -> u64 {
    12
}

fn default_milestone_cooldown() -> u64 {
    8
}

fn default_pattern_cooldown() -> u64 {
    15
}

impl Default for CategoryCooldowns {
    fn default() -> Self {
        Self {
            combo: default_combo_cooldown(),
            crit: default_crit_cooldown(),
            level_up: default_level_up_cooldown(),
            low_hp: default_low_hp_cooldown(),
            low_stamina: default_low_stamina_cooldown(),
            milestone: default_milestone_cooldown(),
            pattern: default_pattern_cooldown(),
        }
    }
}

impl CategoryCooldowns {
    pub fn for_category(&self, category: TriggerCategory) -> Duration {
        let secs = match category {
            TriggerCategory::Combo => self.combo,
            TriggerCategory::Crit => self.crit,
            TriggerCategory::LevelUp => self.level_up,
            TriggerCategory::LowHp => self.low_hp,
            TriggerCategory::LowStamina => self.low_stamina,
            TriggerCategory::Milestone => self.milestone,
            TriggerCategory::Pattern => self.pattern,
        };
        Duration::from_secs(secs)
    }
}

// ─── Affinity bounds ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AffinityConfig {
    #[serde(default = "default_affinity_min")]
    pub min: i32,
    #[serde(default = "default_affinity_start")]
    pub start: i32,
    #[serde(default = "default_affinity_max")]
    pub max: i32,
}

fn default_affinity_min() -> i32 {
    0
}

fn default_affinity_start() -> i32 {
    10
}

fn default_affinity_max() -> i32 {
    100
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            min: default_affinity_min(),
            start: default_affinity_start(),
            max: default_affinity_max(),
        }
    }
}

// ─── Remote backend ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Chat-completions base URL. Each remote variant supplies its own
    /// default when unset.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sliding-window local rate limit; at quota, calls are rejected without
    /// touching the network.
    #[serde(default = "default_rate_limit_quota")]
    pub rate_limit_quota: usize,

    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    150
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_rate_limit_quota() -> usize {
    60
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            rate_limit_quota: default_rate_limit_quota(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

// ─── Mood keyword overrides ──────────────────────────────────────────────────

/// Per-mood keyword overrides for reply classification. An empty list keeps
/// the built-in keywords for that mood; neutral is the fallback and carries
/// no keywords.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoodKeywords {
    #[serde(default)]
    pub excited: Vec<String>,
    #[serde(default)]
    pub tired: Vec<String>,
    #[serde(default)]
    pub serious: Vec<String>,
    #[serde(default)]
    pub impressed: Vec<String>,
    #[serde(default)]
    pub encouraging: Vec<String>,
    #[serde(default)]
    pub mocking: Vec<String>,
}

// ─── Loading & validation ────────────────────────────────────────────────────

impl EngineConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject malformed thresholds and bounds up front so they never become
    /// runtime surprises.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.history_capacity == 0 {
            return Err(ConfigError::Validation(
                "engine.history_capacity must be at least 1".into(),
            ));
        }

        let hp = self.triggers.enemy_hp_below;
        if !(hp > 0.0 && hp <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "triggers.enemy_hp_below must be within (0.0, 1.0], got {hp}"
            )));
        }

        if self.triggers.combo_tiers.is_empty() {
            return Err(ConfigError::Validation(
                "triggers.combo_tiers must list at least one tier".into(),
            ));
        }
        for pair in self.triggers.combo_tiers.windows(2) {
            if pair[1].at <= pair[0].at {
                return Err(ConfigError::Validation(format!(
                    "triggers.combo_tiers must be strictly ascending, got {} after {}",
                    pair[1].at, pair[0].at
                )));
            }
        }

        if self.triggers.whiff_streak == 0 {
            return Err(ConfigError::Validation(
                "triggers.whiff_streak must be at least 1".into(),
            ));
        }

        for (i, category) in self.arbiter.precedence.iter().enumerate() {
            if self.arbiter.precedence[..i].contains(category) {
                return Err(ConfigError::Validation(format!(
                    "arbiter.precedence lists {category} twice"
                )));
            }
        }

        if self.affinity.min >= self.affinity.max {
            return Err(ConfigError::Validation(format!(
                "affinity.min ({}) must be below affinity.max ({})",
                self.affinity.min, self.affinity.max
            )));
        }
        if self.affinity.start < self.affinity.min || self.affinity.start > self.affinity.max {
            return Err(ConfigError::Validation(format!(
                "affinity.start ({}) must lie within [{}, {}]",
                self.affinity.start, self.affinity.min, self.affinity.max
            )));
        }

        if self.remote.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "remote.timeout_secs must be at least 1".into(),
            ));
        }
        if self.remote.rate_limit_quota == 0 {
            return Err(ConfigError::Validation(
                "remote.rate_limit_quota must be at least 1".into(),
            ));
        }
        if self.remote.rate_limit_window_secs == 0 {
            return Err(ConfigError::Validation(
                "remote.rate_limit_window_secs must be at least 1".into(),
            ));
        }

        Ok(())
    }
}
