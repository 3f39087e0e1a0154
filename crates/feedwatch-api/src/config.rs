use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use feedwatch_core::config::SourceConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    /// Base64-encoded bcrypt hash of the shared operator password.
    pub admin_password_hash: Option<String>,
    pub session_ttl: Duration,
    pub poll_interval: Duration,
    pub stream_max_duration: Duration,
    pub advance_watermark: bool,
    pub rate_limit_window: Duration,
    pub login_rate_limit_per_window: u32,
    pub demo_mode: bool,
    pub source: Option<SourceConfig>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("jwt_secret", &"[REDACTED]")
            .field(
                "admin_password_hash",
                &self.admin_password_hash.as_ref().map(|_| "[REDACTED]"),
            )
            .field("session_ttl", &self.session_ttl)
            .field("poll_interval", &self.poll_interval)
            .field("stream_max_duration", &self.stream_max_duration)
            .field("advance_watermark", &self.advance_watermark)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "login_rate_limit_per_window",
                &self.login_rate_limit_per_window,
            )
            .field("demo_mode", &self.demo_mode)
            .field("source", &self.source)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "FEEDWATCH_BIND_ADDR", "127.0.0.1:8080");
        let jwt_secret = required_trimmed(&lookup, "JWT_SECRET")?;
        let admin_password_hash = optional_trimmed(&lookup, "ADMIN_PASSWORD_HASH");

        let session_ttl_secs =
            bounded_u64(&lookup, "SESSION_TTL_SECS", "86400", 300..=604_800)?;
        let poll_interval_ms =
            bounded_u64(&lookup, "FEEDWATCH_POLL_INTERVAL_MS", "2000", 250..=60_000)?;
        let stream_max_secs =
            bounded_u64(&lookup, "FEEDWATCH_STREAM_MAX_SECS", "300", 10..=3_600)?;
        let rate_limit_window_secs =
            bounded_u64(&lookup, "LOGIN_RATE_LIMIT_WINDOW_SECS", "60", 10..=3_600)?;

        let login_rate_limit_per_window =
            value_or_default(&lookup, "LOGIN_RATE_LIMIT_PER_WINDOW", "10")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "LOGIN_RATE_LIMIT_PER_WINDOW must be an integer in [1, 1000]".to_string(),
                    )
                })?;
        if !(1..=1_000).contains(&login_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "LOGIN_RATE_LIMIT_PER_WINDOW must be in [1, 1000]".to_string(),
            ));
        }

        let advance_watermark = parse_flag(&lookup, "FEEDWATCH_ADVANCE_WATERMARK", true)?;
        let demo_mode = parse_flag(&lookup, "FEEDWATCH_DEMO", false)?;

        let source = SourceConfig::optional_from_lookup(&lookup)
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        Ok(Self {
            bind_addr,
            jwt_secret,
            admin_password_hash,
            session_ttl: Duration::from_secs(session_ttl_secs),
            poll_interval: Duration::from_millis(poll_interval_ms),
            stream_max_duration: Duration::from_secs(stream_max_secs),
            advance_watermark,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            login_rate_limit_per_window,
            demo_mode,
            source,
        })
    }
}

fn bounded_u64(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let value = value_or_default(lookup, name, default)
        .parse::<u64>()
        .map_err(|_| {
            ConfigError::Invalid(format!(
                "{name} must be an integer in [{}, {}]",
                range.start(),
                range.end()
            ))
        })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn parse_flag(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!("{name} must be true or false"))),
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
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

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        jwt_secret: "test-jwt-secret".to_string(),
        admin_password_hash: None,
        session_ttl: Duration::from_secs(3_600),
        poll_interval: Duration::from_secs(2),
        stream_max_duration: Duration::from_secs(300),
        advance_watermark: true,
        rate_limit_window: Duration::from_secs(60),
        login_rate_limit_per_window: 10,
        demo_mode: false,
        source: None,
    }
}
