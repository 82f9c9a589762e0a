//! Generic OpenAI-compatible remote backend.
//! Most hosted chat APIs follow the same `/chat/completions` format, so a
//! single implementation covers any of them via `remote.base_url`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::mood::{MoodClassifier, default_mood_for};
use super::ratelimit::RateLimiter;
use super::{Backend, GenerateRequest, Response, ResponseSource};
use crate::config::{MoodKeywords, RemoteConfig};
use crate::error::{ConfigError, GenerateError};
use crate::trigger::{MilestoneKind, PatternKind, RemarkHint};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Speaks the OpenAI-compatible chat completions API. Quota is enforced
/// locally: once the sliding window is spent, calls fail fast without a
/// network round trip.
#[derive(Debug)]
pub struct RemoteBackend {
    model: String,
    temperature: f64,
    max_tokens: u32,
    /// Pre-computed `Bearer <key>` value (avoids `format!` per request).
    cached_auth: String,
    /// Pre-computed chat completions URL (avoids `format!` per request).
    cached_chat_url: String,
    client: Client,
    limiter: Mutex<RateLimiter>,
    classifier: MoodClassifier,
}

impl RemoteBackend {
    pub fn new(
        config: &RemoteConfig,
        moods: &MoodKeywords,
        api_key: &str,
    ) -> Result<Self, ConfigError> {
        let base_url = resolve_override(config.base_url.as_deref(), DEFAULT_BASE_URL, "remote.base_url")?;
        let model = resolve_override(config.model.as_deref(), DEFAULT_MODEL, "remote.model")?;

        Ok(Self {
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            cached_auth: format!("Bearer {api_key}"),
            cached_chat_url: chat_completions_url(&base_url),
            client: build_http_client(config.timeout()),
            limiter: Mutex::new(RateLimiter::new(
                config.rate_limit_quota,
                config.rate_limit_window(),
            )),
            classifier: MoodClassifier::new(moods),
        })
    }

    fn acquire_quota(&self) -> bool {
        self.limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_acquire(Instant::now())
    }
}

/// Reject a blank override; fall back to the variant default when unset.
pub(crate) fn resolve_override(
    value: Option<&str>,
    default: &str,
    field: &str,
) -> Result<String, ConfigError> {
    match value {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(ConfigError::Validation(format!(
                    "{field} must not be blank when set"
                )))
            } else {
                Ok(trimmed.to_string())
            }
        }
        None => Ok(default.to_string()),
    }
}

pub(crate) fn chat_completions_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.contains("chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| Client::new())
}

// ─── Wire format ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

// ─── Prompts ─────────────────────────────────────────────────────────────────

pub(crate) fn describe_moment(hint: &RemarkHint) -> String {
    match hint {
        RemarkHint::Combo(hits) => {
            format!("The player just strung together a {hits}-hit combo.")
        }
        RemarkHint::Crit { damage } => {
            format!("The player just landed a critical hit for {damage} damage.")
        }
        RemarkHint::LevelUp { level } => format!("The player just reached level {level}."),
        RemarkHint::EnemyHp(fraction) => format!(
            "The enemy is nearly down, at {:.0}% health.",
            fraction * 100.0
        ),
        RemarkHint::Stamina(left) => {
            format!("The player is nearly spent, {left} stamina left.")
        }
        RemarkHint::Milestone(MilestoneKind::BestCombo(hits)) => {
            format!("New session record: a {hits}-hit combo, their best yet.")
        }
        RemarkHint::Milestone(MilestoneKind::BestDamage(damage)) => {
            format!("New session record: {damage} damage in one hit, their hardest yet.")
        }
        RemarkHint::Pattern(PatternKind::WhiffStreak(misses)) => {
            format!("The player has whiffed {misses} attacks in a row.")
        }
    }
}

fn situation_prompt(request: &GenerateRequest) -> String {
    let snapshot = &request.snapshot;
    let stats = &snapshot.stats;
    format!(
        "{}\nScene: {}. Player level {}, stamina {}.\n\
         Session so far: best combo {}, hardest hit {}, crit rate {:.0}%.\n\
         Your affinity toward the player is {}/100.\n\
         Say your one line now.",
        describe_moment(&request.candidate.hint),
        snapshot.location,
        snapshot.player_level,
        snapshot.player_stamina,
        stats.best_combo,
        stats.best_damage,
        stats.crit_rate * 100.0,
        snapshot.affinity,
    )
}

// ─── Error scrubbing ─────────────────────────────────────────────────────────

const MAX_API_ERROR_CHARS: usize = 200;

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '+' | '/' | '=')
}

fn scrub_after_marker(scrubbed: &mut String, marker: &str) {
    let mut search_from = 0;
    while let Some(rel) = scrubbed[search_from..].find(marker) {
        let start = search_from + rel;
        let content_start = start + marker.len();
        let mut end = content_start;
        for (i, c) in scrubbed[content_start..].char_indices() {
            if is_secret_char(c) {
                end = content_start + i + c.len_utf8();
            } else {
                break;
            }
        }
        if end == content_start {
            search_from = content_start;
            continue;
        }
        scrubbed.replace_range(start..end, "[REDACTED]");
        search_from = start + "[REDACTED]".len();
    }
}

/// Scrub key-shaped tokens from provider error text and cap its length.
/// Error strings end up in logs; they must never echo a credential back.
pub(crate) fn sanitize_api_error(input: &str) -> String {
    const MARKERS: [&str; 5] = [
        "sk-",
        "Authorization: Bearer ",
        "api_key=",
        "access_token=",
        "\"api_key\":\"",
    ];

    let mut scrubbed = input.to_string();
    for marker in MARKERS {
        scrub_after_marker(&mut scrubbed, marker);
    }

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &scrubbed[..end])
}

/// Turn a failed HTTP response into a transient error with a scrubbed body.
pub(crate) async fn api_error(backend: &str, response: reqwest::Response) -> GenerateError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    let sanitized = sanitize_api_error(&body);
    GenerateError::unavailable(format!("{backend} API error ({status}): {sanitized}"))
}

impl Backend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn source(&self) -> ResponseSource {
        ResponseSource::Remote
    }

    fn generate<'a>(
        &'a self,
        request: &'a GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Response, GenerateError>> + Send + 'a>> {
        Box::pin(async move {
            if !self.acquire_quota() {
                debug!(backend = self.name(), "local rate limit spent, skipping network call");
                return Err(GenerateError::unavailable("local rate limit spent"));
            }

            let chat_request = ChatRequest {
                model: self.model.clone(),
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: request.persona.system_prompt.to_string(),
                    },
                    ChatMessage {
                        role: "user",
                        content: situation_prompt(request),
                    },
                ],
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };

            let response = self
                .client
                .post(&self.cached_chat_url)
                .header("Authorization", &self.cached_auth)
                .json(&chat_request)
                .send()
                .await
                .map_err(|error| {
                    GenerateError::unavailable(format!("chat request failed: {error}"))
                })?;

            if !response.status().is_success() {
                return Err(api_error(self.name(), response).await);
            }

            let chat: ChatResponse = response.json().await.map_err(|error| {
                GenerateError::unavailable(format!("chat reply decode failed: {error}"))
            })?;

            let content = chat
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message.content)
                .ok_or_else(|| GenerateError::unavailable("chat reply carried no choices"))?;

            let text = content.trim();
            if text.is_empty() {
                return Err(GenerateError::NoResponse);
            }

            let mood = self
                .classifier
                .classify(text, default_mood_for(request.candidate.category));

            Ok(Response {
                text: text.to_string(),
                mood,
                priority: request.candidate.priority,
                source: ResponseSource::Remote,
            })
        })
    }
}
