//! Runtime configuration for retries, session lifetimes and presentation.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Retry behaviour for transient storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Linear backoff unit; attempt `n` waits `n * backoff_step`
    pub backoff_step: Duration,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyConfig {
    pub retry: RetryPolicy,
    /// Lifetime of a conflict session, resolved or not
    pub session_ttl: Duration,
    /// Retention of the per-record conflict history
    pub history_ttl: Duration,
    /// Maximum number of history entries kept per record
    pub history_limit: usize,
    /// Maximum characters shown in a value preview
    pub preview_chars: usize,
    /// Window in which two sessions touching one field count as concurrent
    pub concurrent_edit_window: Duration,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            session_ttl: Duration::from_secs(60 * 60),
            history_ttl: Duration::from_secs(24 * 60 * 60),
            history_limit: 50,
            preview_chars: 100,
            concurrent_edit_window: Duration::from_secs(5 * 60),
        }
    }
}

impl ConcurrencyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_attempts = parse_or(&lookup, "CONCORD_MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        if !(1..=10).contains(&max_attempts) {
            return Err(ConfigError::Invalid(
                "CONCORD_MAX_ATTEMPTS must be in [1, 10]".to_string(),
            ));
        }

        let backoff_ms = parse_or(&lookup, "CONCORD_BACKOFF_MS", 50_u64)?;
        if backoff_ms > 5_000 {
            return Err(ConfigError::Invalid(
                "CONCORD_BACKOFF_MS must be <= 5000".to_string(),
            ));
        }

        let session_ttl_secs = parse_or(
            &lookup,
            "CONCORD_SESSION_TTL_SECS",
            defaults.session_ttl.as_secs(),
        )?;
        let history_ttl_secs = parse_or(
            &lookup,
            "CONCORD_HISTORY_TTL_SECS",
            defaults.history_ttl.as_secs(),
        )?;
        if session_ttl_secs == 0 || history_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "CONCORD_SESSION_TTL_SECS and CONCORD_HISTORY_TTL_SECS must be >= 1".to_string(),
            ));
        }

        let history_limit = parse_or(&lookup, "CONCORD_HISTORY_LIMIT", defaults.history_limit)?;
        if history_limit == 0 {
            return Err(ConfigError::Invalid(
                "CONCORD_HISTORY_LIMIT must be >= 1".to_string(),
            ));
        }

        let preview_chars = parse_or(&lookup, "CONCORD_PREVIEW_CHARS", defaults.preview_chars)?;
        if preview_chars < 4 {
            return Err(ConfigError::Invalid(
                "CONCORD_PREVIEW_CHARS must be >= 4".to_string(),
            ));
        }

        let window_secs = parse_or(
            &lookup,
            "CONCORD_CONCURRENT_EDIT_WINDOW_SECS",
            defaults.concurrent_edit_window.as_secs(),
        )?;

        Ok(Self {
            retry: RetryPolicy {
                max_attempts,
                backoff_step: Duration::from_millis(backoff_ms),
            },
            session_ttl: Duration::from_secs(session_ttl_secs),
            history_ttl: Duration::from_secs(history_ttl_secs),
            history_limit,
            preview_chars,
            concurrent_edit_window: Duration::from_secs(window_secs),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    optional_trimmed(lookup, name).map_or(Ok(default), |value| {
        value
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid(format!("{name} must be a non-negative integer")))
    })
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
