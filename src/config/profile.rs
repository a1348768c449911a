//! Environment profiles and variable overrides
//!
//! `RMF_ENV` picks a profile that adjusts a few server defaults. Individual
//! `RMF_*` variables then override single values.

use eyre::Result;

use super::Config;

pub const PROFILE_VAR: &str = "RMF_ENV";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    Production,
    Test,
    Development,
}

impl Profile {
    /// Parse from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Some(Self::Production),
            "test" => Some(Self::Test),
            "development" | "dev" => Some(Self::Development),
            _ => None,
        }
    }

    pub fn from_env() -> Self {
        match std::env::var(PROFILE_VAR) {
            Ok(value) => Self::parse(&value).unwrap_or_else(|| {
                log::warn!("Unknown {} '{}', using production", PROFILE_VAR, value);
                Self::Production
            }),
            Err(_) => Self::Production,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Test => "test",
            Self::Development => "development",
        }
    }

    pub fn apply(&self, config: &mut Config) {
        match self {
            Self::Production => {}
            Self::Test => {
                config.server.sse_retry_timeout = 1000;
                config.server.max_concurrent_requests = 5;
                config.logging.level = "debug".to_string();
            }
            Self::Development => {
                config.server.sse_retry_timeout = 1500;
                config.server.max_concurrent_requests = 3;
                config.logging.level = "debug".to_string();
            }
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| eyre::eyre!("Invalid value '{}' for {}: {}", value, key, e))
}

/// Apply `RMF_*` overrides read through `lookup`
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup("RMF_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(value) = lookup("RMF_SERVER_MAX_CONCURRENT_REQUESTS") {
        config.server.max_concurrent_requests = parse_var("RMF_SERVER_MAX_CONCURRENT_REQUESTS", &value)?;
    }
    if let Some(value) = lookup("RMF_SERVER_SSE_RETRY_TIMEOUT") {
        config.server.sse_retry_timeout = parse_var("RMF_SERVER_SSE_RETRY_TIMEOUT", &value)?;
    }
    if let Some(value) = lookup("RMF_SERVER_SSE_ENABLED") {
        config.server.sse_enabled = parse_var("RMF_SERVER_SSE_ENABLED", &value.to_lowercase())?;
    }
    Ok(())
}
