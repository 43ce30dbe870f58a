use std::fmt;
use std::time::Duration;

use thiserror::Error;

// ─── Defaults ────────────────────────────────────────────────────

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_API_VERSION: &str = "v1";
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
/// 15 minutes.
const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 900_000;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 100;
const DEFAULT_DATABASE_URL: &str = "redis://127.0.0.1:6379/";

// ─── Types ───────────────────────────────────────────────────────

/// Deployment mode. Anything that is not `production` behaves like
/// development (verbose errors, compact access log).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u64,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: Environment,
    pub api_version: String,
    pub cors_origin: String,
    pub rate_limit: RateLimitConfig,
    /// `redis://…` or `memory://`.
    pub database_url: String,
    /// Rebuild store indexes from primary records on startup.
    pub auto_index: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

// ─── Loading ─────────────────────────────────────────────────────

/// Merges `.env` into the process environment. A missing file is not an
/// error; an unreadable one is returned so it can be logged once tracing is up.
pub fn load_dotenv() -> Option<dotenvy::Error> {
    unreadable(dotenvy::dotenv())
}

fn unreadable<T>(result: Result<T, dotenvy::Error>) -> Option<dotenvy::Error> {
    match result {
        Err(e) if !e.not_found() => Some(e),
        _ => None,
    }
}

impl Config {
    /// Reads the process environment. Call [`load_dotenv`] first to merge a
    /// `.env` file into it.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("NODE_ENV")
            .or_else(|| lookup("APP_ENV"))
            .map(|raw| Environment::parse(&raw))
            .unwrap_or(Environment::Development);

        let port = parse_or(&lookup, "PORT", "a port number", DEFAULT_PORT)?;
        let window_ms = parse_or(
            &lookup,
            "RATE_LIMIT_WINDOW_MS",
            "a positive number of milliseconds",
            DEFAULT_RATE_LIMIT_WINDOW_MS,
        )?;
        let max_requests = parse_or(
            &lookup,
            "RATE_LIMIT_MAX_REQUESTS",
            "a positive integer",
            DEFAULT_RATE_LIMIT_MAX_REQUESTS,
        )?;
        if window_ms == 0 {
            return Err(invalid("RATE_LIMIT_WINDOW_MS", "a positive number of milliseconds", "0"));
        }
        if max_requests == 0 {
            return Err(invalid("RATE_LIMIT_MAX_REQUESTS", "a positive integer", "0"));
        }

        let auto_index = match lookup("AUTO_INDEX") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| invalid("AUTO_INDEX", "a boolean", &raw))?,
            None => !environment.is_production(),
        };

        Ok(Self {
            port,
            environment,
            api_version: lookup("API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.into()),
            cors_origin: lookup("CORS_ORIGIN").unwrap_or_else(|| DEFAULT_CORS_ORIGIN.into()),
            rate_limit: RateLimitConfig {
                window: Duration::from_millis(window_ms),
                max_requests,
            },
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            auto_index,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, expected: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| invalid(name, expected, &raw)),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(name: &'static str, expected: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        expected,
        value: value.to_owned(),
    }
}
