use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::config_env::{parse_env, parse_u64_list_env, require_env};

const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SCAN_INTERVAL_SECONDS: u64 = 300;
const DEFAULT_SCAN_BATCH_SIZE: u32 = 100;
const DEFAULT_WORKER_CONCURRENCY: usize = 16;
const DEFAULT_LEASE_SECONDS: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_RESPONSE_BODY_LENGTH: usize = 1_000;
const DEFAULT_RETRY_BASE_SECONDS: u64 = 60;
const DEFAULT_RETRY_MAX_SECONDS: u64 = 3_600;
pub const DEFAULT_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub migrations_dir: PathBuf,
    pub scan_interval_seconds: u64,
    pub scan_batch_size: u32,
    pub worker_concurrency: usize,
    pub lease_seconds: u64,
    pub request_timeout_ms: u64,
    pub max_response_body_length: usize,
    pub retry_base_seconds: u64,
    pub retry_max_seconds: u64,
    /// When set, retries follow this fixed interval table instead of the
    /// exponential curve.
    pub retry_intervals_seconds: Option<Vec<u64>>,
    pub default_ttl_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to load .env file: {0}")]
    Dotenv(String),
}

/// Loads `.env` from the working directory if one exists. A missing file is
/// not an error.
pub fn load_dotenv() -> Result<(), ConfigError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::Dotenv(err.to_string())),
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            database_url: require_env("DATABASE_URL")?,
            database_max_connections: parse_env(
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_DATABASE_MAX_CONNECTIONS,
            )?,
            migrations_dir: env::var("MIGRATIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../db/migrations")
                }),
            scan_interval_seconds: parse_env(
                "WEBHOOK_SCAN_INTERVAL_SECONDS",
                DEFAULT_SCAN_INTERVAL_SECONDS,
            )?,
            scan_batch_size: parse_env("WEBHOOK_SCAN_BATCH_SIZE", DEFAULT_SCAN_BATCH_SIZE)?,
            worker_concurrency: parse_env(
                "WEBHOOK_WORKER_CONCURRENCY",
                DEFAULT_WORKER_CONCURRENCY,
            )?,
            lease_seconds: parse_env("WEBHOOK_LEASE_SECONDS", DEFAULT_LEASE_SECONDS)?,
            request_timeout_ms: parse_env(
                "WEBHOOK_REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT_MS,
            )?,
            max_response_body_length: parse_env(
                "WEBHOOK_MAX_RESPONSE_BODY_LENGTH",
                DEFAULT_MAX_RESPONSE_BODY_LENGTH,
            )?,
            retry_base_seconds: parse_env(
                "WEBHOOK_RETRY_BASE_SECONDS",
                DEFAULT_RETRY_BASE_SECONDS,
            )?,
            retry_max_seconds: parse_env(
                "WEBHOOK_RETRY_MAX_SECONDS",
                DEFAULT_RETRY_MAX_SECONDS,
            )?,
            retry_intervals_seconds: parse_u64_list_env("WEBHOOK_RETRY_INTERVALS_SECONDS")?,
            default_ttl_seconds: parse_env("WEBHOOK_DEFAULT_TTL_SECONDS", DEFAULT_TTL_SECONDS)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_interval_seconds == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_SCAN_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.scan_batch_size == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_SCAN_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_WORKER_CONCURRENCY must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_REQUEST_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }
        if self.lease_seconds.saturating_mul(1_000) <= self.request_timeout_ms {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_LEASE_SECONDS must exceed WEBHOOK_REQUEST_TIMEOUT_MS".to_string(),
            ));
        }
        if self.retry_base_seconds == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_RETRY_BASE_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.retry_max_seconds < self.retry_base_seconds {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_RETRY_MAX_SECONDS must be >= WEBHOOK_RETRY_BASE_SECONDS".to_string(),
            ));
        }
        if let Some(intervals) = &self.retry_intervals_seconds {
            if intervals.is_empty() {
                return Err(ConfigError::InvalidConfiguration(
                    "WEBHOOK_RETRY_INTERVALS_SECONDS must list at least one interval".to_string(),
                ));
            }
            if intervals.windows(2).any(|pair| pair[1] < pair[0]) {
                return Err(ConfigError::InvalidConfiguration(
                    "WEBHOOK_RETRY_INTERVALS_SECONDS must be non-decreasing".to_string(),
                ));
            }
        }
        if self.default_ttl_seconds == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_DEFAULT_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
