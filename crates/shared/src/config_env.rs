use std::env;
use std::str::FromStr;

use crate::config::ConfigError;

pub(crate) fn require_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))
}

/// Parses `key` when set, otherwise returns `default`. Surrounding whitespace
/// is ignored.
pub(crate) fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_u64_list_env(key: &str) -> Result<Option<Vec<u64>>, ConfigError> {
    let Some(raw) = optional_trimmed_env(key) else {
        return Ok(None);
    };

    parse_u64_csv(&raw)
        .map(Some)
        .map_err(|item| {
            ConfigError::InvalidConfiguration(format!("{key} contains invalid integer '{item}'"))
        })
}

pub(crate) fn optional_trimmed_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_u64_csv(raw: &str) -> Result<Vec<u64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse::<u64>().map_err(|_| item.to_string()))
        .collect()
}
