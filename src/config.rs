//! Runtime configuration, read from the environment (and `.env`).

use dotenv::dotenv;
use std::env;
use std::time::Duration;

use crate::error::{Error, Result};

/// Used when `DATABASE_URL` is not set.
pub const DEFAULT_SQLITE_URL: &str = "sqlite://database.db";

const DEFAULT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ADMIN_USERNAME: &str = "admin";
const DEFAULT_ADMIN_PASSWORD: &str = "password123";

/// Which physical store to talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Embedded single-file store, as a `sqlite:` connection string.
    Sqlite(String),
    /// Networked relational store, as a `postgres://` connection string.
    Postgres(String),
}

impl StoreLocation {
    pub fn from_url(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.starts_with("sqlite:") {
            Ok(StoreLocation::Sqlite(url.to_string()))
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(StoreLocation::Postgres(url.to_string()))
        } else {
            Err(Error::Config(format!(
                "unsupported DATABASE_URL scheme: {}",
                url.split(':').next().unwrap_or_default()
            )))
        }
    }
}

/// Credentials seeded into an empty users table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub location: StoreLocation,
    /// Upper bound for every single storage operation.
    pub operation_timeout: Duration,
    pub max_connections: u32,
    pub admin: BootstrapAdmin,
    /// Extra allocation attempts after a `DuplicateKey` on create. Zero keeps
    /// the plain read-then-insert behaviour.
    pub create_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            location: StoreLocation::Sqlite(DEFAULT_SQLITE_URL.to_string()),
            operation_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            admin: BootstrapAdmin {
                username: DEFAULT_ADMIN_USERNAME.to_string(),
                password: DEFAULT_ADMIN_PASSWORD.to_string(),
            },
            create_retries: 0,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any variable source; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let location = match var("DATABASE_URL") {
            Some(url) => StoreLocation::from_url(&url)?,
            None => defaults.location,
        };

        let operation_timeout = match var("SAMPLETRACK_DB_TIMEOUT_MS") {
            Some(ms) => Duration::from_millis(parse_number(&ms, "SAMPLETRACK_DB_TIMEOUT_MS")?),
            None => defaults.operation_timeout,
        };

        let max_connections = match var("SAMPLETRACK_DB_MAX_CONNECTIONS") {
            Some(n) => parse_number(&n, "SAMPLETRACK_DB_MAX_CONNECTIONS")?,
            None => defaults.max_connections,
        };
        if max_connections == 0 {
            return Err(Error::Config(
                "SAMPLETRACK_DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        let create_retries = match var("SAMPLETRACK_CREATE_RETRIES") {
            Some(n) => parse_number(&n, "SAMPLETRACK_CREATE_RETRIES")?,
            None => defaults.create_retries,
        };

        let admin = BootstrapAdmin {
            username: var("SAMPLETRACK_ADMIN_USERNAME").unwrap_or(defaults.admin.username),
            password: var("SAMPLETRACK_ADMIN_PASSWORD").unwrap_or(defaults.admin.password),
        };

        Ok(Config {
            location,
            operation_timeout,
            max_connections,
            admin,
            create_retries,
        })
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got {:?}", key, raw)))
}
