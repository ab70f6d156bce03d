//! Process configuration, read from the environment.
//!
//! A `.env` file in the working directory is loaded first if present (see
//! `main`), so deployments can keep the upstream secrets out of the shell
//! environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::availability::CacheConfig;
use crate::cantamen::{CantamenConfig, ServiceAccount};
use crate::logging::LoggingConfig;

/// Errors in the process configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Location used when the agent omits coordinates or range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationDefaults {
    pub lat: String,
    pub lng: String,
    pub range: String,
}

impl Default for LocationDefaults {
    fn default() -> Self {
        // Freiburg im Breisgau, 1 km
        Self {
            lat: "47.9983".to_string(),
            lng: "7.8423".to_string(),
            range: "1000".to_string(),
        }
    }
}

/// Everything the server needs at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub upstream: CantamenConfig,
    pub account: ServiceAccount,
    pub cache: CacheConfig,
    pub defaults: LocationDefaults,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name
    /// to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.is_empty());

        let host = get("GPT_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port: u16 = parse(&get, "GPT_PORT", 3000)?;
        let bind_addr = format!("{host}:{port}")
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: "GPT_HOST",
                value: host.clone(),
                reason: e.to_string(),
            })?;

        let mut upstream = CantamenConfig::new(get("GPT_X_API_KEY").unwrap_or_default())
            .with_timeout(parse(&get, "GPT_TIMEOUT_SECS", 30)?);
        if let Some(max_concurrent) = get("GPT_MAX_CONCURRENT") {
            let n = parse(&get, "GPT_MAX_CONCURRENT", 0usize)?;
            if n == 0 {
                return Err(ConfigError::Invalid {
                    var: "GPT_MAX_CONCURRENT",
                    value: max_concurrent,
                    reason: "must be at least 1".to_string(),
                });
            }
            upstream = upstream.with_max_concurrent(n);
        }
        if let Some(base_url) = get("GPT_API_HOST") {
            upstream = upstream.with_base_url(base_url);
        }
        if let Some(origin) = get("GPT_ORIGIN") {
            upstream = upstream.with_origin(origin);
        }

        let account = ServiceAccount {
            provider_id: get("GPT_PROVIDER_ID").unwrap_or_else(|| "131".to_string()),
            login: get("GPT_USERNAME").unwrap_or_default(),
            secret: get("GPT_PASSWORD").unwrap_or_default(),
        };

        let cache = CacheConfig {
            ttl: Duration::from_secs(parse(&get, "GPT_POI_CACHE_TTL_SECS", 24 * 60 * 60)?),
            ..CacheConfig::default()
        };

        let fallback = LocationDefaults::default();
        let defaults = LocationDefaults {
            lat: get("GPT_DEFAULT_LAT").unwrap_or(fallback.lat),
            lng: get("GPT_DEFAULT_LNG").unwrap_or(fallback.lng),
            range: get("GPT_DEFAULT_RANGE").unwrap_or(fallback.range),
        };

        let logging = LoggingConfig {
            filter: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            error_log: get("GPT_ERROR_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("error.log")),
        };

        Ok(Self {
            bind_addr,
            upstream,
            account,
            cache,
            defaults,
            logging,
        })
    }

    /// Names of unset variables without which upstream calls will fail.
    pub fn missing_secrets(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.upstream.api_key.is_empty() {
            missing.push("GPT_X_API_KEY");
        }
        if self.account.login.is_empty() {
            missing.push("GPT_USERNAME");
        }
        if self.account.secret.is_empty() {
            missing.push("GPT_PASSWORD");
        }
        missing
    }
}

fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
