//! Environment-based configuration.
//!
//! All settings come from `GYMGATE_*` environment variables with
//! defaults that match a single-machine deployment: the HTTP gate on
//! 8080, the WebSocket endpoint on 8765, the loopback event bridge on
//! 8865, and the reverse proxy on 6080 in front of an upstream on 6081.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_WS_PORT: u16 = 8765;
pub const DEFAULT_EVENT_PORT: u16 = 8865;
pub const DEFAULT_PROXY_PORT: u16 = 6080;
pub const DEFAULT_UPSTREAM: &str = "localhost:6081";
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 43_200;
pub const DEFAULT_CREDENTIAL_FILE: &str = "data/auth.json";
pub const DEFAULT_SESSION_COOKIE: &str = "gymgate_session";
pub const DEFAULT_STATIC_DIR: &str = ".";

/// Configuration errors with the offending variable named.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

impl ConfigError {
    fn invalid(var: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            message: message.into(),
        }
    }
}

/// Runtime configuration for all four listeners.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the bootstrap HTTP gate.
    pub http_port: u16,
    /// Port for the WebSocket endpoint.
    pub ws_port: u16,
    /// Loopback port for the event bridge.
    pub event_port: u16,
    /// Port for the reverse proxy gate.
    pub proxy_port: u16,
    /// Upstream `host:port` the proxy forwards to.
    pub upstream: String,
    /// Session lifetime.
    pub session_ttl: Duration,
    /// Path of the credential store file.
    pub credential_file: PathBuf,
    /// Name of the session cookie.
    pub session_cookie: String,
    /// Root directory for allow-listed static assets.
    pub static_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            ws_port: DEFAULT_WS_PORT,
            event_port: DEFAULT_EVENT_PORT,
            proxy_port: DEFAULT_PROXY_PORT,
            upstream: DEFAULT_UPSTREAM.to_string(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECONDS),
            credential_file: PathBuf::from(DEFAULT_CREDENTIAL_FILE),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
        }
    }
}

impl Config {
    /// Loads configuration from the environment and validates it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            http_port: parse_port("GYMGATE_HTTP_PORT", DEFAULT_HTTP_PORT)?,
            ws_port: parse_port("GYMGATE_WS_PORT", DEFAULT_WS_PORT)?,
            event_port: parse_port("GYMGATE_EVENT_PORT", DEFAULT_EVENT_PORT)?,
            proxy_port: parse_port("GYMGATE_PROXY_PORT", DEFAULT_PROXY_PORT)?,
            upstream: env_or("GYMGATE_UPSTREAM", DEFAULT_UPSTREAM),
            session_ttl: Duration::from_secs(parse_u64(
                "GYMGATE_SESSION_TTL_SECONDS",
                DEFAULT_SESSION_TTL_SECONDS,
            )?),
            credential_file: PathBuf::from(env_or(
                "GYMGATE_CREDENTIAL_FILE",
                DEFAULT_CREDENTIAL_FILE,
            )),
            session_cookie: env_or("GYMGATE_SESSION_COOKIE", DEFAULT_SESSION_COOKIE),
            static_dir: PathBuf::from(env_or("GYMGATE_STATIC_DIR", DEFAULT_STATIC_DIR)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints that individual parsers cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (host, port) = self
            .upstream
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::invalid("GYMGATE_UPSTREAM", "expected host:port"))?;
        if host.is_empty() {
            return Err(ConfigError::invalid("GYMGATE_UPSTREAM", "empty host"));
        }
        if port.parse::<u16>().is_err() {
            return Err(ConfigError::invalid(
                "GYMGATE_UPSTREAM",
                format!("invalid port '{port}'"),
            ));
        }

        if self.session_cookie.is_empty()
            || !self
                .session_cookie
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::invalid(
                "GYMGATE_SESSION_COOKIE",
                "cookie name must be non-empty alphanumeric/_/-",
            ));
        }

        if self.session_ttl.is_zero() {
            return Err(ConfigError::invalid(
                "GYMGATE_SESSION_TTL_SECONDS",
                "session TTL must be positive",
            ));
        }

        Ok(())
    }
}

fn env_or(var: &'static str, default: &str) -> String {
    match env::var(var) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn parse_port(var: &'static str, default: u16) -> Result<u16, ConfigError> {
    match env::var(var) {
        Ok(value) if !value.is_empty() => value
            .parse::<u16>()
            .map_err(|_| ConfigError::invalid(var, format!("'{value}' is not a valid port"))),
        _ => Ok(default),
    }
}

fn parse_u64(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(var) {
        Ok(value) if !value.is_empty() => value
            .parse::<u64>()
            .map_err(|_| ConfigError::invalid(var, format!("'{value}' is not a valid number"))),
        _ => Ok(default),
    }
}
