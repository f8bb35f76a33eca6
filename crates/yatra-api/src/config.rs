use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use yatra_core::services::DEFAULT_MAX_PAGE_SIZE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// SQLite file, or `:memory:` for a throwaway store
    pub database_path: String,
    /// Shared key devices send as a bearer token; open API when unset
    pub device_api_key: Option<String>,
    /// Roster JSON upserted at startup
    pub roster_path: Option<PathBuf>,
    pub max_page_size: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field(
                "device_api_key",
                &self.device_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("roster_path", &self.roster_path)
            .field("max_page_size", &self.max_page_size)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "YATRA_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "YATRA_DATABASE_PATH", "yatra.db");
        let device_api_key = optional_trimmed(&lookup, "YATRA_DEVICE_API_KEY");
        let roster_path = optional_trimmed(&lookup, "YATRA_ROSTER_PATH").map(PathBuf::from);

        let max_page_size = value_or_default(
            &lookup,
            "YATRA_MAX_PAGE_SIZE",
            &DEFAULT_MAX_PAGE_SIZE.to_string(),
        )
        .parse::<usize>()
        .map_err(|_| {
            ConfigError::Invalid("YATRA_MAX_PAGE_SIZE must be an integer in [1, 10000]".to_string())
        })?;
        if !(1..=10_000).contains(&max_page_size) {
            return Err(ConfigError::Invalid(
                "YATRA_MAX_PAGE_SIZE must be in [1, 10000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            database_path,
            device_api_key,
            roster_path,
            max_page_size,
        })
    }

    #[cfg(test)]
    pub fn for_tests(device_api_key: Option<&str>) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            database_path: ":memory:".to_string(),
            device_api_key: device_api_key.map(str::to_string),
            roster_path: None,
            max_page_size: 2,
        }
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
