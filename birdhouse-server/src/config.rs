//! Gateway configuration.
//!
//! Loaded from a TOML file named by `BIRDHOUSE_CONFIG`, or `birdhouse.toml` in the working
//! directory when that exists; built-in defaults otherwise. Every section and field is
//! optional. `BIRDHOUSE_HOST`, `BIRDHOUSE_PORT`, `BIRDHOUSE_LOG_FORMAT` and
//! `BIRDHOUSE_LOG_LEVEL` override the file.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//!
//! [rate_limit]
//! requests_per_minute = 30
//! requests_per_hour = 500
//!
//! [upstream]
//! max_retries = 3
//! backoff_base_secs = 60
//! backoff_max_secs = 600
//! pace_every = 100
//! pace_pause_secs = 2
//!
//! [session]
//! path = "data/cookies.json"
//!
//! [logging]
//! format = "json"
//! level = "info"
//!
//! [telemetry]
//! jsonl_path = "data/events.jsonl"
//! ```

use crate::logging::LogFormat;
use birdhouse::backoff::BackoffError;
use birdhouse::rate_limit::{LimiterConfigError, DEFAULT_REQUESTS_PER_HOUR, DEFAULT_REQUESTS_PER_MINUTE};
use birdhouse::retry::{DEFAULT_MAX_RETRIES, DEFAULT_PACE_EVERY, DEFAULT_PACE_PAUSE};
use birdhouse::session::DEFAULT_SESSION_PATH;
use birdhouse::telemetry::EventEmitter;
use birdhouse::{Backoff, RateLimiter, SessionStore, UpstreamPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "BIRDHOUSE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "birdhouse.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error(transparent)]
    Limiter(#[from] LimiterConfigError),
    #[error(transparent)]
    Backoff(#[from] BackoffError),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub upstream: UpstreamConfig,
    pub session: SessionConfig,
    pub logging: LoggingSection,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".into(), port: 8000 }
    }
}

impl ServerConfig {
    /// `host:port`, suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            requests_per_hour: DEFAULT_REQUESTS_PER_HOUR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    pub max_retries: usize,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: Option<u64>,
    /// `0` disables pacing.
    pub pace_every: u64,
    pub pace_pause_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_secs: Backoff::default().base().as_secs(),
            backoff_max_secs: None,
            pace_every: DEFAULT_PACE_EVERY,
            pace_pause_secs: DEFAULT_PACE_PAUSE.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { path: PathBuf::from(DEFAULT_SESSION_PATH) }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub format: LogFormat,
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { format: LogFormat::Text, level: "info".into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Append every gateway event to this file as JSON lines.
    pub jsonl_path: Option<PathBuf>,
}

impl GatewayConfig {
    /// Resolve, read, override from the environment, and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load_from_path(Path::new(&path))?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::load_from_path(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `BIRDHOUSE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("BIRDHOUSE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("BIRDHOUSE_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::Invalid {
                key: "BIRDHOUSE_PORT",
                reason: format!("'{port}' is not a port number"),
            })?;
        }
        if let Some(format) = lookup("BIRDHOUSE_LOG_FORMAT") {
            self.logging.format = format
                .parse()
                .map_err(|reason| ConfigError::Invalid { key: "BIRDHOUSE_LOG_FORMAT", reason })?;
        }
        if let Some(level) = lookup("BIRDHOUSE_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid { key: "server.host", reason: "must not be empty".into() });
        }
        if self.upstream.backoff_base_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "upstream.backoff_base_secs",
                reason: "must be greater than zero".into(),
            });
        }
        self.backoff()?;
        // Zero limits are rejected by the limiter itself.
        RateLimiter::new(self.rate_limit.requests_per_minute, self.rate_limit.requests_per_hour)?;
        Ok(())
    }

    fn backoff(&self) -> Result<Backoff, ConfigError> {
        let backoff = Backoff::exponential(Duration::from_secs(self.upstream.backoff_base_secs));
        match self.upstream.backoff_max_secs {
            Some(max) => Ok(backoff.with_max(Duration::from_secs(max))?),
            None => Ok(backoff),
        }
    }

    pub fn rate_limiter(&self) -> Result<RateLimiter, ConfigError> {
        Ok(RateLimiter::new(self.rate_limit.requests_per_minute, self.rate_limit.requests_per_hour)?)
    }

    pub fn upstream_policy(&self, events: EventEmitter) -> Result<UpstreamPolicy, ConfigError> {
        Ok(UpstreamPolicy::builder()
            .max_retries(self.upstream.max_retries)
            .backoff(self.backoff()?)
            .pacing(self.upstream.pace_every, Duration::from_secs(self.upstream.pace_pause_secs))
            .with_events(events)
            .build())
    }

    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(&self.session.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.rate_limit.requests_per_minute, 30);
        assert_eq!(config.rate_limit.requests_per_hour, 500);
        assert_eq!(config.upstream.max_retries, 3);
        assert_eq!(config.upstream.backoff_base_secs, 60);
        assert_eq!(config.upstream.pace_every, 100);
        assert_eq!(config.upstream.pace_pause_secs, 2);
        assert_eq!(config.session.path, PathBuf::from("data/cookies.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [rate_limit]
            requests_per_minute = 5

            [logging]
            format = "json"

            [telemetry]
            jsonl_path = "/var/log/birdhouse.jsonl"
            "#,
        )
        .unwrap();
        assert_eq!(config.rate_limit.requests_per_minute, 5);
        assert_eq!(config.rate_limit.requests_per_hour, 500);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.telemetry.jsonl_path, Some(PathBuf::from("/var/log/birdhouse.jsonl")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = GatewayConfig::from_toml_str("[rate_limit]\nrpm = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_limits_fail_validation() {
        let config = GatewayConfig::from_toml_str("[rate_limit]\nrequests_per_hour = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Limiter(_))));
    }

    #[test]
    fn backoff_cap_below_base_fails_validation() {
        let config = GatewayConfig::from_toml_str(
            "[upstream]\nbackoff_base_secs = 60\nbackoff_max_secs = 30\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Backoff(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("BIRDHOUSE_HOST", "0.0.0.0"),
            ("BIRDHOUSE_PORT", "9090"),
            ("BIRDHOUSE_LOG_FORMAT", "pretty"),
            ("BIRDHOUSE_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();
        let mut config = GatewayConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:9090");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn bad_port_override_is_reported() {
        let mut config = GatewayConfig::default();
        let err = config
            .apply_overrides(|key| (key == "BIRDHOUSE_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("BIRDHOUSE_PORT"));
    }

    #[test]
    fn load_from_missing_path_names_the_file() {
        let err = GatewayConfig::load_from_path(Path::new("/nonexistent/birdhouse.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/birdhouse.toml"));
    }
}
