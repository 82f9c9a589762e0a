#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss
)]

//! Demo driver: runs a scripted sparring session against the engine and
//! prints whatever the companion has to say.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use hypeman::history::{ActionKind, ActionRecord};
use hypeman::{BackendSelector, CombatView, CompanionEngine, EngineConfig};

#[derive(Parser)]
#[command(
    name = "hypeman",
    version,
    about = "Companion commentary engine — scripted sparring demo"
)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured backend (rule_based, remote_generic, remote_vendor).
    #[arg(long)]
    backend: Option<BackendSelector>,

    /// Number of evaluation cycles to run.
    #[arg(long, default_value_t = 60)]
    ticks: u32,

    /// Milliseconds between cycles.
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    /// Seed for the scripted fight and the canned-line picks.
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Log engine internals (trigger detection, cooldown suppression).
    #[arg(long, short)]
    verbose: bool,
}

/// Live combat state for the scripted bout; the engine only ever sees it
/// through the read-only `CombatView` accessors.
struct SparringView {
    level: u32,
    stamina: u32,
    combo: u32,
    power: u32,
    crit: bool,
    leveled: bool,
    enemy_hp: f32,
    damage: u32,
}

impl CombatView for SparringView {
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

/// Drives one tick of the fake fight and feeds the action log.
struct Sparring {
    view: SparringView,
    rng: SmallRng,
    enemy_max_hp: f32,
}

impl Sparring {
    fn new(seed: u64) -> Self {
        Self {
            view: SparringView {
                level: 5,
                stamina: 100,
                combo: 0,
                power: 40,
                crit: false,
                leveled: false,
                enemy_hp: 1.0,
                damage: 0,
            },
            rng: SmallRng::seed_from_u64(seed),
            enemy_max_hp: 400.0,
        }
    }

    fn step(&mut self, tick: u32, engine: &mut CompanionEngine, now: Instant) {
        // Event flags describe this cycle only.
        self.view.crit = false;
        self.view.leveled = false;
        self.view.damage = 0;

        if self.view.stamina < 10 {
            // Winded: catch a breath instead of swinging.
            self.view.stamina += self.rng.random_range(15..25);
            self.view.combo = 0;
            return;
        }

        if self.rng.random_bool(0.25) {
            self.view.combo = 0;
            engine.record(ActionRecord {
                kind: ActionKind::Whiff,
                at: now,
                combo: 0,
                damage: 0,
            });
            return;
        }

        let mut damage = self.rng.random_range(8..30);
        let crit = self.rng.random_bool(0.15);
        if crit {
            damage *= 3;
            self.view.crit = true;
        }

        self.view.combo += 1;
        self.view.damage = damage;
        self.view.stamina = self.view.stamina.saturating_sub(self.rng.random_range(2..6));
        engine.record(ActionRecord {
            kind: if crit { ActionKind::Crit } else { ActionKind::Attack },
            at: now,
            combo: self.view.combo,
            damage,
        });

        self.view.enemy_hp -= damage as f32 / self.enemy_max_hp;
        if self.view.enemy_hp <= 0.0 {
            self.view.enemy_hp = 1.0;
            self.view.combo = 0;
            engine.record(ActionRecord {
                kind: ActionKind::EnemyDefeated,
                at: now,
                combo: 0,
                damage: 0,
            });
        }

        if tick > 0 && tick % 25 == 0 {
            self.view.level += 1;
            self.view.leveled = true;
            engine.record(ActionRecord {
                kind: ActionKind::LevelUp,
                at: now,
                combo: self.view.combo,
                damage: 0,
            });
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(backend) = cli.backend {
        config.engine.backend = backend;
    }

    let mut engine = CompanionEngine::seeded(config, cli.seed);
    info!(
        backend = engine.backend_name(),
        persona = engine.persona().display_name,
        "sparring session starting"
    );

    let mut bout = Sparring::new(cli.seed);
    for tick in 0..cli.ticks {
        let now = Instant::now();
        bout.step(tick, &mut engine, now);

        if let Some(response) = engine.tick(&bout.view, now) {
            println!(
                "[{tick:3}] {} ({}): {}",
                engine.persona().display_name,
                response.mood,
                response.text
            );
        }

        tokio::time::sleep(Duration::from_millis(cli.interval_ms)).await;
    }

    info!(
        affinity = engine.affinity(),
        mood = %engine.mood(),
        "session over"
    );
    println!("{}", serde_json::to_string_pretty(engine.stats())?);
    Ok(())
}
