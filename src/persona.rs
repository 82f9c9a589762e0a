use crate::error::ConfigError;
use crate::history::PlayerStats;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A companion voice: who is speaking and how.
#[derive(Debug, Clone, Copy)]
pub struct Persona {
    pub id: &'static str,
    pub display_name: &'static str,
    /// One-line style tag, used in rule templates and logs.
    pub voice: &'static str,
    /// System prompt handed to remote backends.
    pub system_prompt: &'static str,
}

pub const MENTOR: Persona = Persona {
    id: "mentor",
    display_name: "Old Garrick",
    voice: "calm veteran swordsman, brief and weighty",
    system_prompt: "You are a calm veteran swordsman watching a younger fighter train. \
        Offer one short remark, under 20 words. Respect effort, name flaws plainly, never gush. \
        Speak in-universe; no meta commentary.",
};

pub const HYPE: Persona = Persona {
    id: "hype",
    display_name: "Bix",
    voice: "loud best friend, celebrates everything",
    system_prompt: "You are the fighter's loudest best friend watching from the sidelines. \
        React in one short burst, under 20 words, high energy, lots of heart. \
        Speak in-universe; no meta commentary.",
};

pub const JOKER: Persona = Persona {
    id: "joker",
    display_name: "Sable",
    voice: "wisecracking heckler, playful jabs",
    system_prompt: "You are a wisecracking heckler who secretly roots for the fighter. \
        One quip per remark, under 20 words, teasing but never cruel. \
        Speak in-universe; no meta commentary.",
};

pub const ANALYST: Persona = Persona {
    id: "analyst",
    display_name: "Vess",
    voice: "dry tactician, numbers and assessments",
    system_prompt: "You are a dry tactical observer scoring the fighter's form. \
        Give one clipped assessment, under 20 words, concrete and unsentimental. \
        Speak in-universe; no meta commentary.",
};

const ROSTER: [Persona; 4] = [MENTOR, HYPE, JOKER, ANALYST];

pub fn find(id: &str) -> Option<&'static Persona> {
    ROSTER.iter().find(|persona| persona.id == id)
}

pub fn roster() -> impl Iterator<Item = &'static Persona> {
    ROSTER.iter()
}

/// Whether the engine may swap personas to match the player's style.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SwitchPolicy {
    #[default]
    Manual,
    Auto,
}

/// The active voice plus the switching policy.
#[derive(Debug)]
pub struct PersonaState {
    active: &'static Persona,
    policy: SwitchPolicy,
}

impl PersonaState {
    pub fn new(id: &str, policy: SwitchPolicy) -> Result<Self, ConfigError> {
        let active = find(id).ok_or_else(|| ConfigError::UnknownPersona(id.to_string()))?;
        Ok(Self { active, policy })
    }

    /// Last-resort voice when the configured id does not resolve.
    pub fn fallback(policy: SwitchPolicy) -> Self {
        Self {
            active: &HYPE,
            policy,
        }
    }

    pub fn active(&self) -> &'static Persona {
        self.active
    }

    pub fn policy(&self) -> SwitchPolicy {
        self.policy
    }

    pub fn set(&mut self, id: &str) -> Result<(), ConfigError> {
        self.active = find(id).ok_or_else(|| ConfigError::UnknownPersona(id.to_string()))?;
        Ok(())
    }

    /// Under the auto policy, pick the persona that fits the observed play
    /// style. Returns the new id only when an actual switch happened; the
    /// change applies from the next generation, never mid-call.
    pub fn auto_adjust(&mut self, stats: &PlayerStats, affinity: i32) -> Option<&'static str> {
        if self.policy != SwitchPolicy::Auto {
            return None;
        }
        let target = Self::target_for(stats, affinity);
        if target.id == self.active.id {
            return None;
        }
        self.active = target;
        Some(target.id)
    }

    /// Relentless attackers get the hype friend, combo stylists the mentor,
    /// close bonds earn the heckler, everyone else gets the analyst.
    fn target_for(stats: &PlayerStats, affinity: i32) -> &'static Persona {
        if stats.attack_rate > 2.0 {
            &HYPE
        } else if stats.combo_tendency > 0.8 {
            &MENTOR
        } else if affinity > 70 {
            &JOKER
        } else {
            &ANALYST
        }
    }
}
