use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::time::sleep;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hypeman::backend::BackendSelector;
use hypeman::{CombatView, CompanionEngine, ConfigError, EngineConfig, Mood, Response, ResponseSource};

struct StubView {
    level: u32,
    stamina: u32,
    combo: u32,
    crit: bool,
    leveled: bool,
    enemy_hp: f32,
    damage: u32,
}

/// Nothing in this view crosses a default threshold.
fn quiet() -> StubView {
    StubView {
        level: 4,
        stamina: 85,
        combo: 0,
        crit: false,
        leveled: false,
        enemy_hp: 0.8,
        damage: 0,
    }
}

impl CombatView for StubView {
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
        38
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
        "ruined chapel"
    }
}

fn remote_config(base_url: &str) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.engine.backend = BackendSelector::RemoteGeneric;
    config.remote.api_key = Some("sk-test".into());
    config.remote.base_url = Some(base_url.to_string());
    config
}

fn chat_reply(text: &str) -> serde_json::Value {
    json!({ "choices": [{ "message": { "content": text } }] })
}

/// Tick quiet cycles until the in-flight remote call merges. Advances a
/// fabricated clock well inside the timeout; if the reply never lands, one
/// last far-future tick forces the timeout path instead of hanging.
async fn settle(engine: &mut CompanionEngine, from: Instant) -> Option<Response> {
    for attempt in 1..=40_u64 {
        sleep(Duration::from_millis(25)).await;
        let now = from + Duration::from_millis(100 * attempt);
        if let Some(response) = engine.tick(&quiet(), now) {
            return Some(response);
        }
    }
    engine.tick(&quiet(), from + Duration::from_secs(60))
}

#[tokio::test]
async fn unreachable_remote_downgrades_to_one_canned_line() {
    // Nothing listens on port 9, so the dispatched call fails to connect.
    let mut engine = CompanionEngine::seeded(remote_config("http://127.0.0.1:9"), 7);
    let t0 = Instant::now();

    let surge = StubView {
        combo: 9,
        ..quiet()
    };
    assert!(
        engine.tick(&surge, t0).is_none(),
        "remote dispatch must not block the cycle it starts in"
    );

    // Past the remote deadline even the slowest failure mode has resolved.
    let response = engine
        .tick(&quiet(), t0 + Duration::from_secs(11))
        .expect("the failed call downgrades to a canned line");
    assert_eq!(response.source, ResponseSource::RuleBased);
    assert_eq!(response.priority, 45);
    assert!(!response.text.is_empty());

    assert_eq!(engine.stats().responses, 1);
    assert_eq!(engine.stats().unavailable, 1);
    assert_eq!(engine.stats().fallbacks, 1);
    // The downgrade is per call; the session itself is not degraded.
    assert!(engine.degraded_reason().is_none());

    // The failed call produced exactly one remark, not a late duplicate.
    for secs in 12..15 {
        assert!(engine.tick(&quiet(), t0 + Duration::from_secs(secs)).is_none());
    }
    assert_eq!(engine.stats().responses, 1);
}

#[tokio::test]
async fn repeated_remote_failures_never_lock_the_session() {
    let mut engine = CompanionEngine::seeded(remote_config("http://127.0.0.1:9"), 7);
    let t0 = Instant::now();

    let surge = StubView {
        combo: 9,
        ..quiet()
    };
    assert!(engine.tick(&surge, t0).is_none());
    let first = engine
        .tick(&quiet(), t0 + Duration::from_secs(11))
        .expect("the first failure downgrades");
    assert_eq!(first.source, ResponseSource::RuleBased);

    // A second moment after the first failure dispatches again and fails
    // again; each call downgrades on its own.
    let strike = StubView {
        crit: true,
        damage: 64,
        ..quiet()
    };
    let t1 = t0 + Duration::from_secs(20);
    assert!(engine.tick(&strike, t1).is_none());
    let second = engine
        .tick(&quiet(), t1 + Duration::from_secs(11))
        .expect("the second failure downgrades too");
    assert_eq!(second.source, ResponseSource::RuleBased);
    assert_eq!(second.priority, 80);

    assert_eq!(engine.stats().unavailable, 2);
    assert_eq!(engine.stats().fallbacks, 2);
    assert!(
        engine.degraded_reason().is_none(),
        "per-call downgrades never become a session downgrade"
    );
}

#[tokio::test]
async fn remote_reply_merges_on_a_later_cycle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
            "Nine in a row? You are absolutely unstoppable!",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let mut engine = CompanionEngine::seeded(remote_config(&server.uri()), 7);
    let t0 = Instant::now();
    let surge = StubView {
        combo: 9,
        ..quiet()
    };

    assert!(engine.tick(&surge, t0).is_none());
    let response = settle(&mut engine, t0)
        .await
        .expect("the reply merges on a later cycle");

    assert_eq!(response.source, ResponseSource::Remote);
    assert_eq!(response.priority, 45);
    assert_eq!(response.mood, Mood::Excited);
    assert!(response.text.contains("unstoppable"));
    assert_eq!(engine.stats().responses, 1);
    assert_eq!(engine.stats().fallbacks, 0);
    server.verify().await;
}

#[tokio::test]
async fn spent_quota_rejects_locally_without_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("Keep the pressure on!")))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = remote_config(&server.uri());
    config.remote.rate_limit_quota = 1;
    let mut engine = CompanionEngine::seeded(config, 7);
    let t0 = Instant::now();

    // The first moment spends the whole quota.
    let surge = StubView {
        combo: 9,
        ..quiet()
    };
    assert!(engine.tick(&surge, t0).is_none());
    let first = settle(&mut engine, t0)
        .await
        .expect("the first call goes through");
    assert_eq!(first.source, ResponseSource::Remote);

    // The second moment is rejected before any request is built.
    let strike = StubView {
        crit: true,
        damage: 64,
        ..quiet()
    };
    let later = t0 + Duration::from_secs(20);
    assert!(engine.tick(&strike, later).is_none());
    let second = settle(&mut engine, later)
        .await
        .expect("the rejection downgrades to a canned line");
    assert_eq!(second.source, ResponseSource::RuleBased);
    assert_eq!(second.priority, 80);
    assert_eq!(engine.stats().fallbacks, 1);

    // expect(1) holds: the second call never reached the server.
    server.verify().await;
}

#[tokio::test]
async fn slow_remote_times_out_into_a_canned_line() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_json(chat_reply("too late")),
        )
        .mount(&server)
        .await;

    let mut config = remote_config(&server.uri());
    config.remote.timeout_secs = 1;
    let mut engine = CompanionEngine::seeded(config, 7);
    let t0 = Instant::now();

    let rally = StubView {
        leveled: true,
        ..quiet()
    };
    assert!(engine.tick(&rally, t0).is_none());

    // One clock step past the deadline; no real waiting needed.
    let response = engine
        .tick(&quiet(), t0 + Duration::from_secs(2))
        .expect("the timed-out call downgrades");
    assert_eq!(response.source, ResponseSource::RuleBased);
    assert_eq!(response.priority, 90);
    assert_eq!(engine.stats().unavailable, 1);
    assert_eq!(engine.stats().fallbacks, 1);
}

#[tokio::test]
async fn blank_remote_reply_stays_silent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("   ")))
        .mount(&server)
        .await;

    let mut engine = CompanionEngine::seeded(remote_config(&server.uri()), 7);
    let t0 = Instant::now();
    let surge = StubView {
        combo: 9,
        ..quiet()
    };

    assert!(engine.tick(&surge, t0).is_none());
    assert!(
        settle(&mut engine, t0).await.is_none(),
        "a blank reply is a decline, not a line"
    );
    assert_eq!(engine.stats().declined, 1);
    assert_eq!(engine.stats().responses, 0);
}

#[tokio::test]
async fn newer_moment_supersedes_the_inflight_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(300))
                .set_body_json(chat_reply("What a strike!")),
        )
        .mount(&server)
        .await;

    let mut engine = CompanionEngine::seeded(remote_config(&server.uri()), 7);
    let t0 = Instant::now();

    let surge = StubView {
        combo: 9,
        ..quiet()
    };
    assert!(engine.tick(&surge, t0).is_none());
    sleep(Duration::from_millis(50)).await;

    // A crit arrives while the combo call is still pending; it replaces it.
    let strike = StubView {
        crit: true,
        damage: 64,
        ..quiet()
    };
    let later = t0 + Duration::from_secs(3);
    assert!(engine.tick(&strike, later).is_none());

    let response = settle(&mut engine, later)
        .await
        .expect("the superseding call merges");
    assert_eq!(response.source, ResponseSource::Remote);
    assert_eq!(
        response.priority, 80,
        "the merged reply belongs to the crit, not the superseded combo"
    );
    assert_eq!(engine.stats().responses, 1);
}

#[tokio::test]
async fn malformed_remote_body_downgrades_to_rules() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .mount(&server)
        .await;

    let mut engine = CompanionEngine::seeded(remote_config(&server.uri()), 7);
    let t0 = Instant::now();
    let surge = StubView {
        combo: 9,
        ..quiet()
    };

    assert!(engine.tick(&surge, t0).is_none());
    let response = settle(&mut engine, t0)
        .await
        .expect("an undecodable body downgrades");
    assert_eq!(response.source, ResponseSource::RuleBased);
    assert_eq!(engine.stats().unavailable, 1);
    assert_eq!(engine.stats().fallbacks, 1);
}

#[test]
fn config_file_overrides_reach_the_engine() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("hypeman.toml");
    std::fs::write(
        &path,
        r#"
[engine]
persona = "analyst"

[triggers]
combo_tiers = [{ at = 3, priority = 55 }]

[arbiter]
global_cooldown_secs = 1

[arbiter.cooldown_secs]
combo = 1
"#,
    )
    .expect("write config");

    let config = EngineConfig::load(&path).expect("config loads");
    let mut engine = CompanionEngine::seeded(config, 7);
    assert_eq!(engine.persona().id, "analyst");

    let t0 = Instant::now();
    let surge = StubView {
        combo: 3,
        ..quiet()
    };
    let first = engine.tick(&surge, t0).expect("a three-hit combo now speaks");
    assert_eq!(first.priority, 55);

    // Both cooldowns were shortened to one second.
    assert!(engine.tick(&surge, t0 + Duration::from_millis(800)).is_none());
    assert!(engine.tick(&surge, t0 + Duration::from_millis(1500)).is_some());
}

#[test]
fn broken_config_file_is_a_parse_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("hypeman.toml");
    std::fs::write(&path, "triggers = ::: not toml").expect("write config");

    match EngineConfig::load(&path) {
        Err(ConfigError::Parse(reason)) => assert!(!reason.is_empty()),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn missing_config_file_is_an_io_error() {
    match EngineConfig::load(Path::new("/nonexistent/hypeman.toml")) {
        Err(ConfigError::Io(_)) => {}
        other => panic!("expected an io error, got {other:?}"),
    }
}

#[test]
fn a_mixed_session_keeps_honest_counters() {
    let mut engine = CompanionEngine::seeded(EngineConfig::default(), 7);
    let t0 = Instant::now();

    for second in 0..30_u64 {
        let now = t0 + Duration::from_secs(second);
        let view = match second {
            4 => StubView {
                combo: 9,
                ..quiet()
            },
            11 => StubView {
                crit: true,
                damage: 70,
                ..quiet()
            },
            23 => StubView {
                leveled: true,
                ..quiet()
            },
            _ => quiet(),
        };
        engine.tick(&view, now);
    }

    let stats = engine.stats();
    assert_eq!(stats.cycles, 30);
    assert_eq!(stats.responses, 3);
    assert_eq!(stats.declined, 0);
    assert_eq!(stats.unavailable, 0);
    let counted: u64 = stats.mood_counts.values().sum();
    assert_eq!(counted, stats.responses);
    assert_eq!(engine.recent_responses().count(), 3);
}
