use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use thiserror::Error;

use crate::auth::MAX_TOKEN_TTL;

const LOCAL_JWT_SECRET: &str = "conduit-local-development-secret";
const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000);
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TOKEN_TTL_SECS: u64 = 86_400;

/// `DATABASE_URL` value that selects the in-process repository.
pub const MEMORY_DATABASE_URL: &str = "memory://";

/// AppConfig
///
/// Immutable configuration loaded once at startup and shared through the application
/// state via FromRef. The token secret lives here and nowhere else.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub env: Env,
    // Postgres connection string, or `memory://` for the in-process backend.
    pub database_url: String,
    // Process-wide HS256 secret for issuing and verifying bearer tokens.
    pub jwt_secret: String,
    pub bind_addr: SocketAddr,
    pub request_timeout: Duration,
    pub token_ttl: Duration,
}

/// Env
///
/// Runtime context. Production demands an explicit token secret and logs as JSON.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Env {
    Local,
    Production,
}

/// ConfigError
///
/// Startup configuration failure. Always fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
}

impl Default for AppConfig {
    /// Values for test state scaffolding: in-memory storage, local secret.
    fn default() -> Self {
        Self {
            env: Env::Local,
            database_url: MEMORY_DATABASE_URL.to_string(),
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from the environment. Fails fast when DATABASE_URL is
    /// missing, or when JWT_SECRET is missing in production.
    pub fn load() -> Result<Self, ConfigError> {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let database_url = non_empty("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let jwt_secret = match (env, non_empty("JWT_SECRET")) {
            (_, Some(secret)) => secret,
            (Env::Production, None) => return Err(ConfigError::Missing("JWT_SECRET")),
            (Env::Local, None) => LOCAL_JWT_SECRET.to_string(),
        };

        let bind_addr: SocketAddr = match non_empty("BIND_ADDR") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "BIND_ADDR",
                value,
            })?,
            None => DEFAULT_BIND_ADDR,
        };

        Ok(Self {
            env,
            database_url,
            jwt_secret,
            bind_addr,
            request_timeout: seconds("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS, u64::MAX)?,
            token_ttl: seconds("TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS, MAX_TOKEN_TTL.as_secs())?,
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }

    /// True when JWT_SECRET was absent locally and the built-in development secret is in use.
    pub fn uses_development_secret(&self) -> bool {
        self.jwt_secret == LOCAL_JWT_SECRET
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// Accepts whole seconds in `1..=max`.
fn seconds(name: &'static str, default: u64, max: u64) -> Result<Duration, ConfigError> {
    match non_empty(name) {
        None => Ok(Duration::from_secs(default)),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 && secs <= max => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::Invalid { name, value }),
        },
    }
}
