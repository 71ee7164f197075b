//! Configuration module for environment variable parsing.
//!
//! All settings are read once at startup. A missing destination or secret is
//! fatal: the relay never serves traffic without both.

use std::env;
use std::fmt;
use std::num::NonZeroU64;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default inbound body cap (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required but not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Shared webhook secret. Never printed in full.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Private receiver that verified webhooks are forwarded to
    pub destination_url: Url,

    /// Shared secret used to verify `x-hub-signature-256`
    pub webhook_secret: Secret,

    /// Port for the web server to listen on
    pub port: u16,

    /// Requests allowed per client per window (0 disables limiting)
    pub rate_limit_max_requests: u32,

    /// Length of a rate limit window
    pub rate_limit_window: Duration,

    /// How often expired rate limit entries are swept
    pub rate_limit_sweep_interval: Duration,

    /// Whole-request timeout for the outbound forward
    pub forward_timeout: Duration,

    /// Maximum accepted inbound body size in bytes
    pub max_body_bytes: usize,

    /// Take the client address from `x-forwarded-for`
    pub trust_proxy: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let raw_destination = get("DESTINATION_URL").ok_or(ConfigError::Missing("DESTINATION_URL"))?;
        let destination_url = parse_destination(&raw_destination)?;

        let webhook_secret = get("GITHUB_WEBHOOK_SECRET")
            .map(Secret::new)
            .ok_or(ConfigError::Missing("GITHUB_WEBHOOK_SECRET"))?;

        Ok(Config {
            destination_url,
            webhook_secret,
            port: parse_or("PORT", get("PORT"), DEFAULT_PORT)?,
            rate_limit_max_requests: parse_or(
                "RATE_LIMIT_MAX_REQUESTS",
                get("RATE_LIMIT_MAX_REQUESTS"),
                30,
            )?,
            rate_limit_window: parse_secs("RATE_LIMIT_WINDOW_SECS", get("RATE_LIMIT_WINDOW_SECS"), 60)?,
            rate_limit_sweep_interval: parse_secs("RATE_LIMIT_SWEEP_SECS", get("RATE_LIMIT_SWEEP_SECS"), 60)?,
            forward_timeout: parse_secs("FORWARD_TIMEOUT_SECS", get("FORWARD_TIMEOUT_SECS"), 15)?,
            max_body_bytes: parse_or(
                "MAX_BODY_BYTES",
                get("MAX_BODY_BYTES"),
                DEFAULT_MAX_BODY_BYTES,
            )?,
            trust_proxy: parse_bool("TRUST_PROXY", get("TRUST_PROXY"))?,
        })
    }

    /// `host:port` of the destination, without userinfo, path or query.
    pub fn destination_authority(&self) -> String {
        let url = &self.destination_url;
        match (url.host_str(), url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        }
    }
}

/// Destination must be an absolute http(s) URL.
fn parse_destination(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: "DESTINATION_URL",
        value: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {}", other))),
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

/// Whole seconds that must be non-zero.
fn parse_secs(name: &'static str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(Duration::from_secs(default)),
        Some(value) => value
            .parse::<NonZeroU64>()
            .map(|secs| Duration::from_secs(secs.get()))
            .map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
    }
}

fn parse_bool(name: &'static str, raw: Option<String>) -> Result<bool, ConfigError> {
    let Some(value) = raw else {
        return Ok(false);
    };

    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value,
            reason: "expected a boolean".to_string(),
        }),
    }
}
