//! The orchestrator. One synchronous, non-blocking tick runs the whole
//! remark cycle: merge any finished remote call, snapshot the fight, detect
//! candidates, arbitrate, generate, emit or stay silent.
//!
//! All engine state is mutated here and only here. Backends see immutable
//! requests; the host sees at most one [`Response`] per tick and never an
//! error.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::affinity::AffinityScore;
use crate::arbiter::{Arbiter, CooldownState};
use crate::backend::rules::RuleBackend;
use crate::backend::{self, Backend, GenerateRequest, Mood, Response, ResponseSource};
use crate::config::EngineConfig;
use crate::context::{CombatView, ContextBuilder};
use crate::error::{ConfigError, GenerateError};
use crate::history::{ActionRecord, HistoryBuffer, PlayerStats};
use crate::persona::{Persona, PersonaState};
use crate::trigger::TriggerDetector;

const MOOD_HISTORY_CAP: usize = 20;
const RECENT_RESPONSES_CAP: usize = 10;

/// Session counters, exported as-is for display or logging.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub cycles: u64,
    pub responses: u64,
    pub fallbacks: u64,
    pub declined: u64,
    pub unavailable: u64,
    pub mood_counts: HashMap<Mood, u64>,
}

/// A dispatched remote call that has not been merged yet. The original
/// request is kept so a failed call can be downgraded to a canned line.
struct InflightRemote {
    request: GenerateRequest,
    started: Instant,
    rx: oneshot::Receiver<Result<Response, GenerateError>>,
    task: JoinHandle<()>,
}

/// The companion-commentary engine. Construct one per game session; there is
/// no global instance.
///
/// Construction never fails: configuration problems are reported once via
/// `tracing` and downgrade the whole session to the rule backend.
pub struct CompanionEngine {
    config: EngineConfig,
    builder: ContextBuilder,
    history: HistoryBuffer,
    detector: TriggerDetector,
    arbiter: Arbiter,
    cooldowns: CooldownState,
    affinity: AffinityScore,
    persona: PersonaState,
    rules: RuleBackend,
    remote: Option<Arc<dyn Backend>>,
    inflight: Option<InflightRemote>,
    session_fallback: Option<String>,
    mood_history: VecDeque<Mood>,
    recent: VecDeque<Response>,
    stats: EngineStats,
}

impl CompanionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::build(config, None)
    }

    /// Fixed rule-backend seed, for reproducible demo sessions.
    pub fn seeded(config: EngineConfig, seed: u64) -> Self {
        Self::build(config, Some(seed))
    }

    fn build(mut config: EngineConfig, seed: Option<u64>) -> Self {
        let mut session_fallback = None;

        if let Err(error) = config.validate() {
            warn!(%error, "invalid configuration; using defaults and canned lines");
            session_fallback = Some(error.to_string());
            config = EngineConfig::default();
        }

        let remote = match backend::create_backend(&config) {
            Ok(built) if built.source() == ResponseSource::Remote => Some(built),
            Ok(_) => None,
            Err(error) => {
                warn!(%error, "backend setup failed; canned lines for the rest of the session");
                if session_fallback.is_none() {
                    session_fallback = Some(error.to_string());
                }
                None
            }
        };

        let persona = match PersonaState::new(&config.engine.persona, config.engine.persona_policy)
        {
            Ok(state) => state,
            Err(error) => {
                warn!(%error, "unknown persona id; using the default voice");
                if session_fallback.is_none() {
                    session_fallback = Some(error.to_string());
                }
                PersonaState::fallback(config.engine.persona_policy)
            }
        };

        Self {
            builder: ContextBuilder::new(),
            history: HistoryBuffer::new(config.engine.history_capacity),
            detector: TriggerDetector::new(config.triggers.clone()),
            arbiter: Arbiter::new(config.arbiter.clone()),
            cooldowns: CooldownState::new(),
            affinity: AffinityScore::new(&config.affinity),
            persona,
            rules: seed.map_or_else(RuleBackend::new, RuleBackend::seeded),
            remote,
            inflight: None,
            session_fallback,
            mood_history: VecDeque::new(),
            recent: VecDeque::new(),
            stats: EngineStats::default(),
            config,
        }
    }

    /// Run one evaluation cycle. Never blocks: remote generation is
    /// dispatched to a background task and merged on a later tick.
    ///
    /// When a merged remote remark (or its fallback line) is emitted, the
    /// cycle ends there; fresh detection resumes on the next tick.
    pub fn tick(&mut self, view: &dyn CombatView, now: Instant) -> Option<Response> {
        self.stats.cycles += 1;

        if let Some((request, result)) = self.take_finished_remote(now) {
            match result {
                Ok(response) => return self.emit(response, now),
                Err(GenerateError::NoResponse) => {
                    self.stats.declined += 1;
                    debug!("remote declined to speak");
                }
                Err(error) => {
                    self.stats.unavailable += 1;
                    warn!(%error, "remote generation unavailable");
                    if self.config.engine.fallback_to_rules
                        && let Some(response) = self.fallback_line(&request)
                    {
                        return self.emit(response, now);
                    }
                }
            }
        }

        let snapshot =
            self.builder
                .build(view, now, self.affinity.value(), self.history.stats());
        let candidates = self.detector.detect(&snapshot, &self.history);
        // Session bests advance only after detection has compared against
        // the old ones; a record therefore fires exactly once.
        self.history
            .absorb_bests(snapshot.combo_count, snapshot.recent_damage);

        let candidate = self.arbiter.select(candidates, now, &mut self.cooldowns)?;
        let request = GenerateRequest {
            candidate,
            snapshot,
            persona: *self.persona.active(),
        };

        if let Some(remote) = self.remote_for_dispatch() {
            match Handle::try_current() {
                Ok(handle) => {
                    self.dispatch(&handle, remote, request, now);
                    return None;
                }
                Err(_) => self.degrade("remote generation needs a running tokio runtime"),
            }
        }

        match self.rules.respond(&request) {
            Ok(response) => self.emit(response, now),
            Err(GenerateError::NoResponse) => {
                self.stats.declined += 1;
                None
            }
            Err(error) => {
                self.stats.unavailable += 1;
                warn!(%error, "rule generation failed");
                None
            }
        }
    }

    /// Record a combat action into the history buffer. Hosts call this as
    /// events happen, independently of the tick cadence.
    pub fn record(&mut self, record: ActionRecord) {
        debug!(kind = %record.kind, combo = record.combo, "action recorded");
        self.history.push(record);
    }

    pub fn affinity(&self) -> i32 {
        self.affinity.value()
    }

    /// Current companion mood: the dominant mood of the last few remarks,
    /// or the affinity band's baseline when recent remarks disagree.
    pub fn mood(&self) -> Mood {
        let mut counts: HashMap<Mood, usize> = HashMap::new();
        for mood in self.mood_history.iter().rev().take(5) {
            *counts.entry(*mood).or_insert(0) += 1;
        }
        for mood in self.mood_history.iter().rev().take(5) {
            if counts.get(mood).copied().unwrap_or(0) >= 3 {
                return *mood;
            }
        }
        self.affinity.base_mood()
    }

    pub fn persona(&self) -> &'static Persona {
        self.persona.active()
    }

    pub fn set_persona(&mut self, id: &str) -> Result<(), ConfigError> {
        self.persona.set(id)
    }

    pub fn player_stats(&self) -> PlayerStats {
        self.history.stats()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn recent_responses(&self) -> impl Iterator<Item = &Response> {
        self.recent.iter()
    }

    /// Name of the backend that will serve the next accepted candidate.
    pub fn backend_name(&self) -> &'static str {
        match (&self.remote, &self.session_fallback) {
            (Some(remote), None) => remote.name(),
            _ => "rules",
        }
    }

    /// Why this session is stuck on canned lines, if it is.
    pub fn degraded_reason(&self) -> Option<&str> {
        self.session_fallback.as_deref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop all session state: history, cooldowns, affinity, moods, recent
    /// remarks, counters, and any in-flight remote call.
    pub fn reset(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            inflight.task.abort();
        }
        self.history.clear();
        self.cooldowns.clear();
        self.builder.clear();
        self.affinity.reset();
        self.mood_history.clear();
        self.recent.clear();
        self.stats = EngineStats::default();
        debug!("engine state reset");
    }

    // ─── Cycle internals ─────────────────────────────────────────────────────

    fn take_finished_remote(
        &mut self,
        now: Instant,
    ) -> Option<(GenerateRequest, Result<Response, GenerateError>)> {
        let timeout = self.config.remote.timeout();
        let inflight = self.inflight.as_mut()?;
        let outcome = match inflight.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => {
                if now.saturating_duration_since(inflight.started) >= timeout {
                    Some(Err(GenerateError::unavailable("remote call timed out")))
                } else {
                    None
                }
            }
            Err(TryRecvError::Closed) => Some(Err(GenerateError::unavailable(
                "remote task dropped its reply channel",
            ))),
        };

        let result = outcome?;
        let inflight = self.inflight.take()?;
        inflight.task.abort();
        Some((inflight.request, result))
    }

    fn remote_for_dispatch(&self) -> Option<Arc<dyn Backend>> {
        if self.session_fallback.is_some() {
            return None;
        }
        self.remote.clone()
    }

    /// Permanent downgrade to canned lines, reported once.
    fn degrade(&mut self, reason: &str) {
        if self.session_fallback.is_none() {
            warn!(reason, "session downgraded to canned lines");
            self.session_fallback = Some(reason.to_string());
        }
    }

    /// Latest wins: a newer accepted candidate supersedes whatever is still
    /// in flight.
    fn dispatch(
        &mut self,
        handle: &Handle,
        backend: Arc<dyn Backend>,
        request: GenerateRequest,
        now: Instant,
    ) {
        if let Some(previous) = self.inflight.take() {
            previous.task.abort();
            debug!("superseding an in-flight remote call");
        }

        debug!(
            backend = backend.name(),
            category = %request.candidate.category,
            "dispatching remote call"
        );

        let (tx, rx) = oneshot::channel();
        let task_request = request.clone();
        let task = handle.spawn(async move {
            let result = backend.generate(&task_request).await;
            let _ = tx.send(result);
        });

        self.inflight = Some(InflightRemote {
            request,
            started: now,
            rx,
            task,
        });
    }

    fn fallback_line(&mut self, request: &GenerateRequest) -> Option<Response> {
        match self.rules.respond(request) {
            Ok(response) => {
                self.stats.fallbacks += 1;
                info!(
                    category = %request.candidate.category,
                    "remote unavailable, downgraded to a canned line"
                );
                Some(response)
            }
            Err(_) => None,
        }
    }

    fn emit(&mut self, response: Response, now: Instant) -> Option<Response> {
        let affinity = self.affinity.apply(response.mood);
        self.stats.responses += 1;
        *self.stats.mood_counts.entry(response.mood).or_insert(0) += 1;

        self.mood_history.push_back(response.mood);
        if self.mood_history.len() > MOOD_HISTORY_CAP {
            self.mood_history.pop_front();
        }

        self.builder.mark_remark(now);

        if let Some(switched) = self.persona.auto_adjust(&self.history.stats(), affinity) {
            info!(persona = switched, "auto-switched persona to match play style");
        }

        debug!(
            mood = %response.mood,
            affinity,
            source = %response.source,
            "remark emitted"
        );

        self.recent.push_back(response.clone());
        if self.recent.len() > RECENT_RESPONSES_CAP {
            self.recent.pop_front();
        }

        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendSelector;
    use crate::history::ActionKind;
    use std::time::Duration;

    struct ScriptedView {
        level: u32,
        stamina: u32,
        combo: u32,
        power: u32,
        crit: bool,
        leveled: bool,
        enemy_hp: f32,
        damage: u32,
    }

    /// A quiet moment: nothing in this view crosses any default threshold.
    fn calm() -> ScriptedView {
        ScriptedView {
            level: 5,
            stamina: 90,
            combo: 0,
            power: 40,
            crit: false,
            leveled: false,
            enemy_hp: 0.9,
            damage: 0,
        }
    }

    impl CombatView for ScriptedView {
        fn player_level(&self) -> u32 {
            self.level
        }
        fn player_stamina(&self) -> u32 {
            self.stamina
        }
        fn combo_count(&self) -> u32 {
            self.combo
        }
        fn attack_power(&self) -> u32 {
            self.power
        }
        fn crit_landed(&self) -> bool {
            self.crit
        }
        fn leveled_up(&self) -> bool {
            self.leveled
        }
        fn enemy_hp_percent(&self) -> f32 {
            self.enemy_hp
        }
        fn recent_damage(&self) -> u32 {
            self.damage
        }
        fn location(&self) -> &str {
            "training yard"
        }
    }

    fn engine() -> CompanionEngine {
        CompanionEngine::seeded(EngineConfig::default(), 7)
    }

    #[test]
    fn quiet_view_stays_silent() {
        let mut engine = engine();
        assert!(engine.tick(&calm(), Instant::now()).is_none());
        assert_eq!(engine.stats().cycles, 1);
        assert_eq!(engine.stats().responses, 0);
    }

    #[test]
    fn combo_threshold_produces_one_rule_remark() {
        let mut engine = engine();
        // 9 hits: inside the 8-hit tier, below the milestone floor of 10.
        let view = ScriptedView { combo: 9, ..calm() };
        let response = engine.tick(&view, Instant::now()).unwrap();
        assert_eq!(response.source, ResponseSource::RuleBased);
        assert_eq!(response.priority, 45);
        assert!(!response.text.is_empty());
    }

    #[test]
    fn global_cooldown_silences_the_next_tick() {
        let mut engine = engine();
        let t0 = Instant::now();
        let view = ScriptedView {
            combo: 15,
            ..calm()
        };
        assert!(engine.tick(&view, t0).is_some());
        assert!(engine.tick(&view, t0 + Duration::from_millis(500)).is_none());
    }

    #[test]
    fn crit_outranks_a_simultaneous_combo() {
        let mut engine = engine();
        let view = ScriptedView {
            combo: 15,
            crit: true,
            damage: 61,
            ..calm()
        };
        let response = engine.tick(&view, Instant::now()).unwrap();
        // Crit priority 80 beats the 15-hit combo tier's 50.
        assert_eq!(response.priority, 80);
    }

    #[test]
    fn second_level_up_within_its_window_is_silent() {
        let mut engine = engine();
        let t0 = Instant::now();
        let view = ScriptedView {
            leveled: true,
            ..calm()
        };
        assert!(engine.tick(&view, t0).is_some());
        // 5s later: global cooldown has cleared, level-up's 10s window has not.
        assert!(engine.tick(&view, t0 + Duration::from_secs(5)).is_none());
        assert!(engine.tick(&view, t0 + Duration::from_secs(11)).is_some());
    }

    #[test]
    fn whiff_streak_surfaces_as_a_pattern_remark() {
        let mut engine = engine();
        let t0 = Instant::now();
        for i in 0..4 {
            engine.record(ActionRecord {
                kind: ActionKind::Whiff,
                at: t0 + Duration::from_millis(200 * i),
                combo: 0,
                damage: 0,
            });
        }
        let response = engine.tick(&calm(), t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(response.priority, 35);
    }

    #[test]
    fn milestone_fires_once_per_record() {
        let mut engine = engine();
        let t0 = Instant::now();
        let view = ScriptedView {
            combo: 12,
            ..calm()
        };
        // 12 beats the starting best (0) and clears the floor (10); milestone
        // priority 70 outranks the 8-hit combo tier's 45.
        let first = engine.tick(&view, t0).unwrap();
        assert_eq!(first.priority, 70);

        // Same combo later: bests were absorbed, so only the tier remark is
        // eligible once its cooldowns clear.
        let later = engine.tick(&view, t0 + Duration::from_secs(20)).unwrap();
        assert_eq!(later.priority, 45);
    }

    #[test]
    fn emission_moves_affinity_and_mood_history() {
        let mut engine = engine();
        let start = engine.affinity();
        let view = ScriptedView {
            leveled: true,
            ..calm()
        };
        // Every level-up line carries a non-neutral mood, so affinity moves.
        engine.tick(&view, Instant::now()).unwrap();
        assert_ne!(engine.affinity(), start);
        assert_eq!(engine.stats().responses, 1);
        assert_eq!(engine.recent_responses().count(), 1);
    }

    #[test]
    fn invalid_config_degrades_to_rules_and_still_speaks() {
        let mut config = EngineConfig::default();
        config.affinity.min = 50;
        config.affinity.max = 10;
        let mut engine = CompanionEngine::seeded(config, 7);

        assert!(engine.degraded_reason().is_some());
        assert_eq!(engine.backend_name(), "rules");

        let view = ScriptedView {
            combo: 15,
            ..calm()
        };
        let response = engine.tick(&view, Instant::now()).unwrap();
        assert_eq!(response.source, ResponseSource::RuleBased);
    }

    #[test]
    fn missing_remote_key_degrades_to_rules_once() {
        // Assumes no OPENAI_API_KEY / HYPEMAN_API_KEY in the test environment.
        let mut config = EngineConfig::default();
        config.engine.backend = BackendSelector::RemoteGeneric;
        config.remote.api_key = None;
        let mut engine = CompanionEngine::seeded(config, 7);

        assert!(engine.degraded_reason().is_some());
        let view = ScriptedView {
            combo: 15,
            ..calm()
        };
        let response = engine.tick(&view, Instant::now()).unwrap();
        assert_eq!(response.source, ResponseSource::RuleBased);
    }

    #[test]
    fn unknown_persona_degrades_but_keeps_a_voice() {
        let mut config = EngineConfig::default();
        config.engine.persona = "stranger".into();
        let engine = CompanionEngine::seeded(config, 7);
        assert!(engine.degraded_reason().is_some());
        assert_eq!(engine.persona().id, "hype");
    }

    #[test]
    fn set_persona_rejects_unknown_ids() {
        let mut engine = engine();
        assert!(engine.set_persona("analyst").is_ok());
        assert_eq!(engine.persona().id, "analyst");
        assert!(engine.set_persona("nobody").is_err());
        assert_eq!(engine.persona().id, "analyst");
    }

    #[test]
    fn mood_defaults_to_the_affinity_band() {
        let engine = engine();
        // Start affinity 10 of 100 sits in the serious band.
        assert_eq!(engine.mood(), Mood::Serious);
    }

    #[test]
    fn reset_clears_session_state() {
        let mut engine = engine();
        let t0 = Instant::now();
        let view = ScriptedView {
            combo: 15,
            ..calm()
        };
        engine.record(ActionRecord {
            kind: ActionKind::Attack,
            at: t0,
            combo: 1,
            damage: 10,
        });
        assert!(engine.tick(&view, t0).is_some());

        engine.reset();
        assert_eq!(engine.stats().cycles, 0);
        assert_eq!(engine.recent_responses().count(), 0);
        assert_eq!(engine.affinity(), 10);
        // Cooldowns cleared: the same moment may fire again immediately.
        assert!(engine.tick(&view, t0).is_some());
    }
}
