#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use,
    clippy::cast_precision_loss
)]

//! Companion commentary engine for action games: watches combat through a
//! read-only view, decides when the companion should speak, and produces at
//! most one remark per cycle from canned lines or a remote chat model.

pub mod affinity;
pub mod arbiter;
pub mod backend;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod history;
pub mod persona;
pub mod trigger;

pub use backend::{Backend, BackendSelector, GenerateRequest, Mood, Response, ResponseSource};
pub use config::EngineConfig;
pub use context::{CombatView, ContextSnapshot};
pub use engine::{CompanionEngine, EngineStats};
pub use error::{ConfigError, GenerateError};
