use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Upper bound for a single completion call (or a single streamed chunk).
    pub llm_timeout: Duration,
    pub llm_max_retries: u32,
    /// When set, sessions are checkpointed in Redis instead of process memory.
    pub redis_url: Option<String>,
    pub session_ttl: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            llm_timeout: Duration::from_secs(parse_env("LLM_TIMEOUT_SECS", 120)?),
            llm_max_retries: parse_env("LLM_MAX_RETRIES", 3)?,
            redis_url: optional_env("REDIS_URL"),
            session_ttl: optional_env("SESSION_TTL_SECS")
                .map(|v| {
                    v.parse::<u64>()
                        .context("SESSION_TTL_SECS must be a whole number of seconds")
                })
                .transpose()?
                .map(Duration::from_secs),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: '{raw}'")),
        None => Ok(default),
    }
}
