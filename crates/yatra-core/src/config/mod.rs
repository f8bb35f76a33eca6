//! Device and sync agent configuration.
//!
//! `AgentConfig` comes from `YATRA_*` environment variables; `DeviceConfig`
//! is a small JSON profile each volunteer's device carries.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::CheckpointId;
use crate::util::{is_http_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Capped exponential backoff between submission attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next try after `failed_attempts` failures.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = i32::try_from(failed_attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled_ms = self.initial_delay.as_secs_f64() * 1_000.0 * self.multiplier.powi(exponent);
        if !scaled_ms.is_finite() || scaled_ms >= self.max_delay.as_secs_f64() * 1_000.0 {
            self.max_delay
        } else {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let millis = scaled_ms.round() as u64;
            Duration::from_millis(millis)
        }
    }
}

/// Tuning for the client sync agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub poll_interval: Duration,
    pub submit_timeout: Duration,
    pub retry: BackoffPolicy,
    /// Entries requested per canonical log page
    pub page_size: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            submit_timeout: Duration::from_millis(5_000),
            retry: BackoffPolicy::default(),
            page_size: 500,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let poll_interval_secs = ranged(&lookup, "YATRA_POLL_INTERVAL_SECS", 10, 1..=3_600)?;
        let submit_timeout_ms = ranged(&lookup, "YATRA_SUBMIT_TIMEOUT_MS", 5_000, 100..=120_000)?;
        let retry_initial_ms = ranged(&lookup, "YATRA_RETRY_INITIAL_MS", 1_000, 10..=60_000)?;
        let retry_max_secs = ranged(&lookup, "YATRA_RETRY_MAX_SECS", 60, 1..=3_600)?;
        let page_size = ranged(&lookup, "YATRA_PAGE_SIZE", 500, 1..=10_000)?;

        let multiplier = match optional_trimmed(&lookup, "YATRA_RETRY_MULTIPLIER") {
            Some(raw) => raw.parse::<f64>().map_err(|_| {
                ConfigError::Invalid(
                    "YATRA_RETRY_MULTIPLIER must be a number in [1.0, 10.0]".to_string(),
                )
            })?,
            None => 2.0,
        };
        if !(1.0..=10.0).contains(&multiplier) {
            return Err(ConfigError::Invalid(
                "YATRA_RETRY_MULTIPLIER must be in [1.0, 10.0]".to_string(),
            ));
        }

        let retry = BackoffPolicy {
            initial_delay: Duration::from_millis(retry_initial_ms),
            max_delay: Duration::from_secs(retry_max_secs),
            multiplier,
        };
        if retry.initial_delay > retry.max_delay {
            return Err(ConfigError::Invalid(
                "YATRA_RETRY_INITIAL_MS must not exceed YATRA_RETRY_MAX_SECS".to_string(),
            ));
        }

        Ok(Self {
            poll_interval: Duration::from_secs(poll_interval_secs),
            submit_timeout: Duration::from_millis(submit_timeout_ms),
            retry,
            page_size: usize::try_from(page_size).unwrap_or(10_000),
        })
    }
}

/// Per-device profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub device_id: String,
    /// Checkpoint this device is stationed at
    #[serde(default)]
    pub checkpoint_id: Option<CheckpointId>,
    #[serde(default)]
    pub volunteer: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Where pending scans are journaled between runs
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

impl DeviceConfig {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            checkpoint_id: None,
            volunteer: None,
            api_base_url: None,
            journal_path: None,
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.normalized()
    }

    /// Trim fields and check the values make sense
    pub fn normalized(self) -> Result<Self, ConfigError> {
        let device_id = normalize_text_option(Some(self.device_id))
            .ok_or(ConfigError::MissingVar("device_id"))?;
        let api_base_url = normalize_text_option(self.api_base_url)
            .map(|url| url.trim_end_matches('/').to_string());
        if let Some(url) = api_base_url.as_deref() {
            if !is_http_url(url) {
                return Err(ConfigError::Invalid(
                    "api_base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        Ok(Self {
            device_id,
            checkpoint_id: self.checkpoint_id,
            volunteer: normalize_text_option(self.volunteer),
            api_base_url,
            journal_path: self.journal_path,
        })
    }
}

fn ranged(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let value = match optional_trimmed(lookup, name) {
        Some(raw) => raw.parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!(
                "{name} must be an integer in [{}, {}]",
                range.start(),
                range.end()
            ))
        })?,
        None => default,
    };
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )))
    }
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}
