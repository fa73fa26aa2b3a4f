use std::time::Duration;

use thiserror::Error;

use crate::retention::RetentionPolicy;
use crate::storage_keys::{sanitize_source_id, source_id_from_endpoint};

pub const ADMIN_ENDPOINT_URL: &str = "ADMIN_ENDPOINT_URL";
pub const TARGET_STORE_ID: &str = "TARGET_STORE_ID";
pub const REGION: &str = "REGION";
pub const SOURCE_ID: &str = "SOURCE_ID";
pub const ADMIN_AUTH_HEADER: &str = "ADMIN_AUTH_HEADER";
pub const FETCH_TIMEOUT_MS: &str = "FETCH_TIMEOUT_MS";
pub const WRITE_TIMEOUT_MS: &str = "WRITE_TIMEOUT_MS";
pub const MAX_RETRIES: &str = "MAX_RETRIES";
pub const RETRY_BACKOFF_MS: &str = "RETRY_BACKOFF_MS";
pub const INVOCATION_TIMEOUT_MS: &str = "INVOCATION_TIMEOUT_MS";
pub const RETENTION_DAYS: &str = "RETENTION_DAYS";
pub const RETENTION_MIN_KEEP: &str = "RETENTION_MIN_KEEP";

/// Variable names from the first deployment, still honored as fallbacks.
pub const LEGACY_ADMIN_URL: &str = "ZK_ADMIN_URL";
pub const LEGACY_STORE_ID: &str = "ZK_BACK_FOLDER_NAME";

pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
pub const DEFAULT_INVOCATION_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RETENTION_DAYS: u32 = 10;
pub const DEFAULT_RETENTION_MIN_KEEP: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name} must be configured")]
    Missing { name: &'static str },
    #[error("{name} must be a non-negative integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
    #[error("cannot derive a source id from '{endpoint}'; set {SOURCE_ID}")]
    UnderivableSource { endpoint: String },
}

/// Everything the entry point needs, resolved once per process.
///
/// Endpoint, store and region values are opaque: they are only checked for
/// non-emptiness and handed to the adapters untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub admin_endpoint_url: String,
    pub target_store_id: String,
    pub region: String,
    pub source_id: String,
    pub admin_auth_header: Option<String>,
    pub fetch_timeout: Duration,
    pub write_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub invocation_timeout: Duration,
    pub retention_days: u32,
    pub retention_min_keep: usize,
}

impl BackupConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let admin_endpoint_url = value(ADMIN_ENDPOINT_URL)
            .or_else(|| value(LEGACY_ADMIN_URL))
            .ok_or(ConfigError::Missing {
                name: ADMIN_ENDPOINT_URL,
            })?;
        let target_store_id = value(TARGET_STORE_ID)
            .or_else(|| value(LEGACY_STORE_ID))
            .ok_or(ConfigError::Missing {
                name: TARGET_STORE_ID,
            })?;
        let region = value(REGION).ok_or(ConfigError::Missing { name: REGION })?;

        let source_id = match value(SOURCE_ID) {
            Some(raw) => sanitize_source_id(&raw),
            None => source_id_from_endpoint(&admin_endpoint_url).ok_or_else(|| {
                ConfigError::UnderivableSource {
                    endpoint: admin_endpoint_url.clone(),
                }
            })?,
        };

        let number = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            match value(name) {
                Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidNumber {
                    name,
                    value: raw.clone(),
                }),
                None => Ok(default),
            }
        };
        let narrow = |name: &'static str, raw: u64| {
            u32::try_from(raw).map_err(|_| ConfigError::InvalidNumber {
                name,
                value: raw.to_string(),
            })
        };

        let retention_min_keep = number(RETENTION_MIN_KEEP, DEFAULT_RETENTION_MIN_KEEP as u64)?;

        Ok(Self {
            admin_endpoint_url,
            target_store_id,
            region,
            source_id,
            admin_auth_header: value(ADMIN_AUTH_HEADER),
            fetch_timeout: Duration::from_millis(number(
                FETCH_TIMEOUT_MS,
                DEFAULT_FETCH_TIMEOUT_MS,
            )?),
            write_timeout: Duration::from_millis(number(
                WRITE_TIMEOUT_MS,
                DEFAULT_WRITE_TIMEOUT_MS,
            )?),
            max_retries: narrow(
                MAX_RETRIES,
                number(MAX_RETRIES, u64::from(DEFAULT_MAX_RETRIES))?,
            )?,
            retry_backoff: Duration::from_millis(number(
                RETRY_BACKOFF_MS,
                DEFAULT_RETRY_BACKOFF_MS,
            )?),
            invocation_timeout: Duration::from_millis(number(
                INVOCATION_TIMEOUT_MS,
                DEFAULT_INVOCATION_TIMEOUT_MS,
            )?),
            retention_days: narrow(
                RETENTION_DAYS,
                number(RETENTION_DAYS, u64::from(DEFAULT_RETENTION_DAYS))?,
            )?,
            retention_min_keep: usize::try_from(retention_min_keep).map_err(|_| {
                ConfigError::InvalidNumber {
                    name: RETENTION_MIN_KEEP,
                    value: retention_min_keep.to_string(),
                }
            })?,
        })
    }

    /// `None` when pruning is disabled (`RETENTION_DAYS=0`).
    pub fn retention_policy(&self) -> Option<RetentionPolicy> {
        if self.retention_days == 0 {
            return None;
        }
        Some(RetentionPolicy::new(
            self.retention_days,
            self.retention_min_keep,
        ))
    }
}
