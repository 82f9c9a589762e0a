//! Generation backends: the rule-based table and the remote chat variants.
//!
//! Every backend speaks the same narrow contract: one candidate in, one
//! [`Response`] out, with failures expressed as [`GenerateError`] values
//! rather than panics across the seam.

pub mod deepseek;
pub mod mood;
pub mod ratelimit;
pub mod remote;
pub mod rules;

use crate::config::EngineConfig;
use crate::context::ContextSnapshot;
use crate::error::{ConfigError, GenerateError};
use crate::persona::Persona;
use crate::trigger::TriggerCandidate;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use strum::{Display, EnumString};

/// Emotional color of a remark; drives affinity deltas and presentation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Mood {
    Neutral,
    Excited,
    Tired,
    Serious,
    Impressed,
    Encouraging,
    Mocking,
}

/// Which kind of backend produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResponseSource {
    RuleBased,
    Remote,
}

/// One finished remark, ready for the host to present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub text: String,
    pub mood: Mood,
    pub priority: u8,
    pub source: ResponseSource,
}

/// Everything a backend needs to render one remark.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub candidate: TriggerCandidate,
    pub snapshot: ContextSnapshot,
    pub persona: Persona,
}

/// The generation seam. Implementations never panic across this boundary;
/// all failure modes are [`GenerateError`] values.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    fn source(&self) -> ResponseSource;

    fn generate<'a>(
        &'a self,
        request: &'a GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Response, GenerateError>> + Send + 'a>>;
}

impl std::fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("name", &self.name()).finish()
    }
}

/// Which backend the session runs on. Unknown names fail configuration
/// parsing instead of being discovered broken at call time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendSelector {
    #[default]
    RuleBased,
    RemoteGeneric,
    RemoteVendor,
}

/// Resolve the remote API key: explicit config value first, then the
/// variant's own environment variables, then the generic `HYPEMAN_API_KEY`.
pub fn resolve_api_key(explicit: Option<&str>, vendor_env: &[&str]) -> Option<String> {
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Some(key.to_string());
    }

    for env_var in vendor_env.iter().chain(&["HYPEMAN_API_KEY"]) {
        if let Ok(value) = std::env::var(env_var) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}

/// Build the configured backend, validating everything that can be checked
/// up front: selector, credentials, endpoint. A failure here is permanent
/// for the session; the engine downgrades to rules and reports once.
pub fn create_backend(config: &EngineConfig) -> Result<Arc<dyn Backend>, ConfigError> {
    match config.engine.backend {
        BackendSelector::RuleBased => Ok(Arc::new(rules::RuleBackend::new())),
        BackendSelector::RemoteGeneric => {
            let api_key = resolve_api_key(config.remote.api_key.as_deref(), &["OPENAI_API_KEY"])
                .ok_or_else(|| ConfigError::MissingApiKey {
                    backend: BackendSelector::RemoteGeneric.to_string(),
                })?;
            let backend = remote::RemoteBackend::new(&config.remote, &config.moods, &api_key)?;
            Ok(Arc::new(backend))
        }
        BackendSelector::RemoteVendor => {
            let api_key = resolve_api_key(config.remote.api_key.as_deref(), &["DEEPSEEK_API_KEY"])
                .ok_or_else(|| ConfigError::MissingApiKey {
                    backend: BackendSelector::RemoteVendor.to_string(),
                })?;
            let backend = deepseek::DeepSeekBackend::new(&config.remote, &config.moods, &api_key)?;
            Ok(Arc::new(backend))
        }
    }
}
