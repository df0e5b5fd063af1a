use std::time::Duration;

use thiserror::Error;

use crate::backends::{Backend, GraphApiCredentials};
use crate::constants::{DEFAULT_GRAPH_API_BASE_URL, DEFAULT_INSTAGRAM_BASE_URL};
use crate::orchestrator::DEFAULT_MAX_RESULTS;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Optional login for the GraphQL backend.
///
/// Only used to tell whether a run is authenticated; login mechanics live outside this crate.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Fetch engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Backend
    pub backend: Backend,
    pub instagram_base_url: String,
    pub graph_api_base_url: String,
    pub graph_api: Option<GraphApiCredentials>,
    pub login: Option<LoginCredentials>,

    // Limits and pacing
    pub max_results: usize,
    pub page_delay: Duration,
    pub request_timeout: Duration,

    // Retry policy
    pub retry: RetryPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if variables are present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Backend
            backend: parse_backend(&env_or_default("FETCH_BACKEND", "graphql"))?,
            instagram_base_url: env_or_default("INSTAGRAM_BASE_URL", DEFAULT_INSTAGRAM_BASE_URL),
            graph_api_base_url: env_or_default("GRAPH_API_BASE_URL", DEFAULT_GRAPH_API_BASE_URL),
            graph_api: graph_api_credentials()?,
            login: match (optional_env("LOGIN_USERNAME"), optional_env("LOGIN_PASSWORD")) {
                (Some(username), Some(password)) => Some(LoginCredentials { username, password }),
                _ => None,
            },

            // Limits and pacing
            max_results: parse_env_usize("MAX_RESULTS", DEFAULT_MAX_RESULTS)?,
            page_delay: Duration::from_secs(parse_env_u64("PAGE_DELAY_SECS", 10)?),
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 30)?),

            // Retry policy
            retry: RetryPolicy {
                max_retries: parse_env_u32("MAX_RETRIES", 3)?,
                retry_delay: Duration::from_secs(parse_env_u64("RETRY_DELAY_SECS", 5)?),
                rate_limit_base: Duration::from_secs(parse_env_u64("RATE_LIMIT_BASE_SECS", 1)?),
                max_jitter: Duration::from_millis(parse_env_u64("RETRY_JITTER_MS", 2000)?),
            },
        })
    }

    /// Configuration pointed at `base_url` for both backends, with no pacing or backoff delays.
    #[must_use]
    pub fn for_testing(base_url: &str) -> Self {
        Self {
            backend: Backend::GraphQl,
            instagram_base_url: base_url.to_string(),
            graph_api_base_url: format!("{}/v21.0/", base_url.trim_end_matches('/')),
            graph_api: None,
            login: None,
            max_results: DEFAULT_MAX_RESULTS,
            page_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::immediate(3),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_results == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_RESULTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_RETRIES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        validate_base_url("INSTAGRAM_BASE_URL", &self.instagram_base_url)?;
        validate_base_url("GRAPH_API_BASE_URL", &self.graph_api_base_url)?;
        if self.backend == Backend::GraphApi && self.graph_api.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "GRAPH_API_ACCESS_TOKEN (required for FETCH_BACKEND=graph_api)".to_string(),
            ));
        }
        Ok(())
    }
}

fn graph_api_credentials() -> Result<Option<GraphApiCredentials>, ConfigError> {
    match (
        optional_env("GRAPH_API_ACCESS_TOKEN"),
        optional_env("GRAPH_API_ACCOUNT_ID"),
    ) {
        (Some(access_token), Some(account_id)) => Ok(Some(GraphApiCredentials {
            access_token,
            account_id,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::MissingEnvVar(
            "GRAPH_API_ACCOUNT_ID".to_string(),
        )),
        (None, Some(_)) => Err(ConfigError::MissingEnvVar(
            "GRAPH_API_ACCESS_TOKEN".to_string(),
        )),
    }
}

fn validate_base_url(name: &str, value: &str) -> Result<(), ConfigError> {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("unsupported scheme '{}'", url.scheme()),
        }),
        Err(e) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: e.to_string(),
        }),
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_backend(value: &str) -> Result<Backend, ConfigError> {
    value
        .parse()
        .map_err(|message| ConfigError::InvalidValue {
            name: "FETCH_BACKEND".to_string(),
            message,
        })
}
