//! DeepSeek remote backend. Chat-completions compatible, but with its own
//! quirks: streaming must be pinned off, and replies tend to arrive wrapped
//! in quotation marks.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::mood::{MoodClassifier, default_mood_for};
use super::ratelimit::RateLimiter;
use super::remote::{
    api_error, build_http_client, chat_completions_url, describe_moment, resolve_override,
};
use super::{Backend, GenerateRequest, Response, ResponseSource};
use crate::config::{MoodKeywords, RemoteConfig};
use crate::error::{ConfigError, GenerateError};

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
const DEFAULT_MODEL: &str = "deepseek-chat";

pub struct DeepSeekBackend {
    model: String,
    temperature: f64,
    max_tokens: u32,
    cached_auth: String,
    cached_chat_url: String,
    client: Client,
    limiter: Mutex<RateLimiter>,
    classifier: MoodClassifier,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u32,
    /// DeepSeek defaults to streaming on some gateways; we always want one
    /// complete body.
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl DeepSeekBackend {
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

    fn build_request(&self, request: &GenerateRequest) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system",
                    content: request.persona.system_prompt.to_string(),
                },
                Message {
                    role: "user",
                    content: battle_report(request),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        }
    }
}

fn battle_report(request: &GenerateRequest) -> String {
    let snapshot = &request.snapshot;
    format!(
        "Battle report from {}:\n\
         - {}\n\
         - combo {}, attack power {}, enemy HP {:.0}%\n\
         - {}s since your last remark\n\
         Respond with a single spoken line, nothing else.",
        snapshot.location,
        describe_moment(&request.candidate.hint),
        snapshot.combo_count,
        snapshot.attack_power,
        snapshot.enemy_hp_percent * 100.0,
        snapshot.since_last_remark.as_secs(),
    )
}

/// DeepSeek often quotes its one-liners. Strip one layer of matching wrap.
fn strip_wrapping_quotes(text: &str) -> &str {
    let trimmed = text.trim();
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}'), ('\u{2018}', '\u{2019}')] {
        if trimmed.starts_with(open)
            && trimmed.ends_with(close)
            && trimmed.len() >= open.len_utf8() + close.len_utf8()
        {
            return trimmed[open.len_utf8()..trimmed.len() - close.len_utf8()].trim();
        }
    }
    trimmed
}

impl Backend for DeepSeekBackend {
    fn name(&self) -> &'static str {
        "deepseek"
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

            let chat_request = self.build_request(request);

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

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(GenerateError::unavailable(
                    "deepseek rate limited upstream (429)",
                ));
            }
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

            let text = strip_wrapping_quotes(&content);
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
