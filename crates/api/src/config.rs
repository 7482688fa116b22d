//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::{RetryPolicy, RsvpWaitPolicy, SagaConfig};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default `"0.0.0.0"`)
/// - `PORT`: listen port (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default `pretty`)
/// - `PUBLIC_BASE_URL`: base of the RSVP links e-mailed to guests
/// - `DATABASE_URL`: PostgreSQL journal; in-memory when unset
/// - `STEP_MAX_ATTEMPTS`, `STEP_BACKOFF_MS`: step retry budget and initial backoff
/// - `CARD_DELAY_SECS`: sleep before delivery when no event date is given
/// - `RSVP_MAX_WAIT_SECS`: bound on the RSVP wait; unbounded when unset
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub public_base_url: String,
    pub database_url: Option<String>,
    pub step_max_attempts: u32,
    pub step_backoff_ms: u32,
    pub card_delay_secs: u64,
    pub rsvp_max_wait_secs: Option<u64>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    expected: "\"pretty\" or \"json\"",
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse(var("PORT"), "PORT")?.unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            public_base_url: var("PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url),
            database_url: var("DATABASE_URL"),
            step_max_attempts: parse(var("STEP_MAX_ATTEMPTS"), "STEP_MAX_ATTEMPTS")?
                .unwrap_or(defaults.step_max_attempts),
            step_backoff_ms: parse(var("STEP_BACKOFF_MS"), "STEP_BACKOFF_MS")?
                .unwrap_or(defaults.step_backoff_ms),
            card_delay_secs: parse(var("CARD_DELAY_SECS"), "CARD_DELAY_SECS")?
                .unwrap_or(defaults.card_delay_secs),
            rsvp_max_wait_secs: parse(var("RSVP_MAX_WAIT_SECS"), "RSVP_MAX_WAIT_SECS")?,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Saga settings derived from this configuration.
    pub fn saga_config(&self) -> SagaConfig {
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy::new(
            self.step_max_attempts,
            self.step_backoff_ms,
            defaults.max_interval_ms,
            defaults.multiplier,
            defaults.jitter_percent,
        );
        let rsvp_wait = match self.rsvp_max_wait_secs {
            Some(secs) => RsvpWaitPolicy::Bounded(Duration::from_secs(secs)),
            None => RsvpWaitPolicy::Unbounded,
        };

        SagaConfig::default()
            .with_retry(retry)
            .with_rsvp_wait(rsvp_wait)
            .with_card_delay(Duration::from_secs(self.card_delay_secs))
            .with_webhook_base_url(self.public_base_url.clone())
    }
}

fn parse<T: std::str::FromStr>(
    value: Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|raw| {
            raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name,
                expected: "a non-negative integer",
                value: raw.clone(),
            })
        })
        .transpose()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            public_base_url: "http://localhost:3000".to_string(),
            database_url: None,
            step_max_attempts: 3,
            step_backoff_ms: 500,
            card_delay_secs: 5,
            rsvp_max_wait_secs: None,
        }
    }
}
