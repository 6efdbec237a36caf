//! Runtime configuration from `RESYNC_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::app::{
    DEFAULT_POLL_INTERVAL, DEFAULT_RECOVERY_WINDOW, DEFAULT_SERVICE_ID, DEFAULT_SYNC_RETRY_BUDGET,
    RetryPolicy,
};
use crate::impls::http_service::DEFAULT_BASE_URL;

pub const DEFAULT_STORE_PATH: &str = "resync-store.json";
/// Same order of magnitude as browser local storage.
pub const DEFAULT_STORE_QUOTA_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_PROBE_TARGET: &str = "generativelanguage.googleapis.com:443";
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub store_path: PathBuf,
    /// `0` disables the quota.
    pub store_quota_bytes: u64,
    pub api_base_url: String,
    pub service_id: String,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub recovery_window: Duration,
    pub sync_retry_budget: u32,
    pub probe_target: String,
    pub probe_interval: Duration,
    pub request_timeout: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            store_quota_bytes: DEFAULT_STORE_QUOTA_BYTES,
            api_base_url: DEFAULT_BASE_URL.to_string(),
            service_id: DEFAULT_SERVICE_ID.to_string(),
            retry: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            recovery_window: DEFAULT_RECOVERY_WINDOW,
            sync_retry_budget: DEFAULT_SYNC_RETRY_BUDGET,
            probe_target: DEFAULT_PROBE_TARGET.to_string(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let env = Env { lookup: &lookup };

        let retry = RetryPolicy {
            max_attempts: env.parsed("RESYNC_MAX_RETRIES", defaults.retry.max_attempts)?,
            initial_delay: env.millis("RESYNC_INITIAL_DELAY_MS", defaults.retry.initial_delay)?,
            max_jitter: env.millis("RESYNC_MAX_JITTER_MS", defaults.retry.max_jitter)?,
            ..defaults.retry
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "RESYNC_MAX_RETRIES",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Config {
            store_path: env
                .get("RESYNC_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),
            store_quota_bytes: env.parsed("RESYNC_STORE_QUOTA_BYTES", defaults.store_quota_bytes)?,
            api_base_url: env.or("RESYNC_API_BASE_URL", defaults.api_base_url),
            service_id: env.or("RESYNC_SERVICE_ID", defaults.service_id),
            retry,
            poll_interval: env.secs("RESYNC_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            recovery_window: env.millis("RESYNC_RECOVERY_WINDOW_MS", defaults.recovery_window)?,
            sync_retry_budget: env.parsed("RESYNC_SYNC_RETRY_BUDGET", defaults.sync_retry_budget)?,
            probe_target: env.or("RESYNC_PROBE_TARGET", defaults.probe_target),
            probe_interval: env.secs("RESYNC_PROBE_INTERVAL_SECS", defaults.probe_interval)?,
            request_timeout: env.secs("RESYNC_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            log_level: env.or("RESYNC_LOG_LEVEL", defaults.log_level),
        })
    }

    pub fn store_quota(&self) -> Option<u64> {
        (self.store_quota_bytes > 0).then_some(self.store_quota_bytes)
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn or(&self, key: &str, default: String) -> String {
        self.get(key).unwrap_or(default)
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: format!("'{raw}': {e}"),
            }),
        }
    }

    fn millis(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parsed(key, default_ms).map(Duration::from_millis)
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parsed(key, default.as_secs()).map(Duration::from_secs)
    }
}
