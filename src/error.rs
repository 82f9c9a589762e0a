use thiserror::Error;

// ─── Startup / configuration errors ──────────────────────────────────────────

/// Errors raised while loading or validating engine configuration.
///
/// These are permanent for the session: the engine reports them once at
/// startup and activates the rule-based backend instead. They are never
/// surfaced per-cycle.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unknown persona: {0}")]
    UnknownPersona(String),

    #[error("no API key for {backend}: set [remote].api_key or the HYPEMAN_API_KEY env var")]
    MissingApiKey { backend: String },

    #[error("validation failed: {0}")]
    Validation(String),
}

// ─── Per-call generation errors ──────────────────────────────────────────────

/// Outcome of a failed or declined generation attempt.
///
/// `Unavailable` is transient (transport failure, timeout, rate limit,
/// malformed reply) and triggers the per-call rule-based fallback.
/// `NoResponse` is intentional silence and is not an error condition for the
/// caller; the cycle simply emits nothing.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend declined to respond")]
    NoResponse,
}

impl GenerateError {
    /// Shorthand for building an [`Unavailable`](Self::Unavailable) with
    /// formatted context.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    /// `true` when the failure should be recovered through the rule-based
    /// fallback rather than swallowed as silence.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_displays_reason() {
        let err = ConfigError::Validation("enemy_hp_below out of range".into());
        assert!(err.to_string().contains("enemy_hp_below"));
    }

    #[test]
    fn missing_api_key_names_backend_and_env_var() {
        let err = ConfigError::MissingApiKey {
            backend: "remote_vendor".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("remote_vendor"));
        assert!(msg.contains("HYPEMAN_API_KEY"));
    }

    #[test]
    fn unavailable_is_recoverable() {
        assert!(GenerateError::unavailable("connect refused").is_recoverable());
        assert!(!GenerateError::NoResponse.is_recoverable());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.toml");
        let err: ConfigError = io.into();
        assert!(err.to_string().contains("missing.toml"));
    }
}
