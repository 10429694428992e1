use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::anchor::PlaceholderRules;
use crate::clock::RetryPolicy;

pub const DEFAULT_REMOTE_BASE_URL: &str = "/schedule-widget";
pub const DEFAULT_BLOB_NAME: &str = "schedule.json";
pub const DEFAULT_CACHE_KEY: &str = "schedule-widget.schedule.v1";
pub const DEFAULT_CONTAINER_SELECTOR: &str = ".homeSectionsContainer";
pub const DEFAULT_MIN_POPULATED_CHILDREN: usize = 1;
pub const DEFAULT_MARKER_ATTRIBUTE: &str = "data-schedule-widget";
pub const DEFAULT_ADMIN_HEADER: &str = "X-Admin-Token";
pub const DEFAULT_HOST_REQUEST_GLOBAL: &str = "__scheduleWidgetHostRequest";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_ANCHOR_RETRY: RetryPolicy = RetryPolicy::new(8, 120);
pub const DEFAULT_POPULATION_WAIT: RetryPolicy = RetryPolicy::new(20, 250);
pub const DEFAULT_MOUNT_CONFIRM: RetryPolicy = RetryPolicy::new(10, 100);
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 200;
pub const DEFAULT_STABLE_BATCHES: u32 = 5;
pub const DEFAULT_ROUTE_COOLDOWN_MS: u64 = 1_000;
pub const DEFAULT_NAVIGATION_DEBOUNCE_MS: u64 = 150;
pub const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 400;
pub const DEFAULT_BACKUP_CACHE_PREFIX: &str = "schedule-widget.backup.";
pub const DEFAULT_DAY_ROLLOVER_MINUTES: i32 = 120;
pub const MAX_DAY_ROLLOVER_MINUTES: i32 = 1_440;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid widget config: {0}")]
    Parse(String),
    #[error("remote base url must be a path or an http(s) url: {0}")]
    InvalidBaseUrl(String),
    #[error("blob name must not be empty")]
    EmptyBlobName,
    #[error("cache key must not be empty")]
    EmptyCacheKey,
    #[error("container selector must not be empty")]
    EmptyContainerSelector,
    #[error("marker attribute must be a data-* attribute name: {0}")]
    InvalidMarkerAttribute(String),
    #[error("{0} must allow at least one attempt")]
    ZeroAttempts(&'static str),
    #[error("unknown log level: {0}")]
    InvalidLogLevel(String),
    #[error("backup cache prefix must not be empty")]
    EmptyBackupCachePrefix,
    #[error("day rollover must be within -1440..=1440 minutes: {0}")]
    DayRolloverOutOfRange(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WidgetConfig {
    pub remote_base_url: String,
    pub blob_name: String,
    pub cache_key: String,
    pub container_selector: String,
    pub min_populated_children: usize,
    pub marker_attribute: String,
    pub placeholder: PlaceholderRules,
    pub anchor_retry: RetryPolicy,
    pub settle_delay_ms: u64,
    pub stable_batches_before_disconnect: u32,
    pub population_wait: RetryPolicy,
    pub mount_confirm: RetryPolicy,
    pub route_cooldown_ms: u64,
    pub navigation_debounce_ms: u64,
    pub save_debounce_ms: u64,
    /// Write a timestamped copy of every saved payload next to the blob.
    pub backup_before_save: bool,
    pub backup_cache_prefix: String,
    /// The highlighted "today" column switches this many minutes after
    /// local midnight. Negative values switch early.
    pub day_rollover_minutes: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
    pub admin_header: String,
    pub host_request_global: String,
    pub log_level: String,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            remote_base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
            blob_name: DEFAULT_BLOB_NAME.to_string(),
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            container_selector: DEFAULT_CONTAINER_SELECTOR.to_string(),
            min_populated_children: DEFAULT_MIN_POPULATED_CHILDREN,
            marker_attribute: DEFAULT_MARKER_ATTRIBUTE.to_string(),
            placeholder: PlaceholderRules::default(),
            anchor_retry: DEFAULT_ANCHOR_RETRY,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            stable_batches_before_disconnect: DEFAULT_STABLE_BATCHES,
            population_wait: DEFAULT_POPULATION_WAIT,
            mount_confirm: DEFAULT_MOUNT_CONFIRM,
            route_cooldown_ms: DEFAULT_ROUTE_COOLDOWN_MS,
            navigation_debounce_ms: DEFAULT_NAVIGATION_DEBOUNCE_MS,
            save_debounce_ms: DEFAULT_SAVE_DEBOUNCE_MS,
            backup_before_save: true,
            backup_cache_prefix: DEFAULT_BACKUP_CACHE_PREFIX.to_string(),
            day_rollover_minutes: DEFAULT_DAY_ROLLOVER_MINUTES,
            admin_token: None,
            admin_header: DEFAULT_ADMIN_HEADER.to_string(),
            host_request_global: DEFAULT_HOST_REQUEST_GLOBAL.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl WidgetConfig {
    /// Parses a partial override object; absent fields keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Self =
            serde_json::from_str(raw).map_err(|error| ConfigError::Parse(error.to_string()))?;
        config.remote_base_url = normalize_base_url(&config.remote_base_url)?;
        config.admin_token = config
            .admin_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        normalize_base_url(&self.remote_base_url)?;
        if self.blob_name.trim().is_empty() {
            return Err(ConfigError::EmptyBlobName);
        }
        if self.cache_key.trim().is_empty() {
            return Err(ConfigError::EmptyCacheKey);
        }
        if self.container_selector.trim().is_empty() {
            return Err(ConfigError::EmptyContainerSelector);
        }
        let marker = self.marker_attribute.trim();
        if !marker.starts_with("data-")
            || marker.len() <= "data-".len()
            || marker.chars().any(|ch| ch.is_ascii_whitespace())
        {
            return Err(ConfigError::InvalidMarkerAttribute(
                self.marker_attribute.clone(),
            ));
        }
        for (name, policy) in [
            ("anchorRetry", self.anchor_retry),
            ("populationWait", self.population_wait),
            ("mountConfirm", self.mount_confirm),
        ] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::ZeroAttempts(name));
            }
        }
        if self.backup_before_save && self.backup_cache_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyBackupCachePrefix);
        }
        if !(-MAX_DAY_ROLLOVER_MINUTES..=MAX_DAY_ROLLOVER_MINUTES).contains(&self.day_rollover_minutes) {
            return Err(ConfigError::DayRolloverOutOfRange(self.day_rollover_minutes));
        }
        if !LOG_LEVELS.contains(&self.log_level.trim().to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }
        Ok(())
    }
}

/// Same-origin paths are allowed as-is; absolute urls must be http(s) with a host.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if trimmed.starts_with('/') && !trimmed.starts_with("//") {
        return Ok(trimmed.to_string());
    }
    let Some((scheme, remainder)) = trimmed.split_once("://") else {
        return Err(ConfigError::InvalidBaseUrl(raw.to_string()));
    };
    if !(scheme == "http" || scheme == "https")
        || remainder.trim().is_empty()
        || remainder.starts_with('/')
    {
        return Err(ConfigError::InvalidBaseUrl(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(WidgetConfig::default().validate(), Ok(()));
    }

    #[test]
    fn partial_override_keeps_defaults() {
        let config = WidgetConfig::from_json_str(
            r#"{"remoteBaseUrl": "https://media.example.com/blobs/", "saveDebounceMs": 50,
                "adminToken": "  ", "anchorRetry": {"maxAttempts": 2, "delayMs": 10}}"#,
        )
        .expect("valid override");
        assert_eq!(config.remote_base_url, "https://media.example.com/blobs");
        assert_eq!(config.save_debounce_ms, 50);
        assert_eq!(config.admin_token, None);
        assert_eq!(config.anchor_retry, RetryPolicy::new(2, 10));
        assert_eq!(config.blob_name, DEFAULT_BLOB_NAME);
        assert_eq!(config.cache_key, DEFAULT_CACHE_KEY);
        assert!(config.backup_before_save);
        assert_eq!(config.day_rollover_minutes, DEFAULT_DAY_ROLLOVER_MINUTES);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            WidgetConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
        assert_eq!(
            WidgetConfig::from_json_str(r#"{"remoteBaseUrl": "ftp://host"}"#),
            Err(ConfigError::InvalidBaseUrl("ftp://host".to_string()))
        );
        assert_eq!(
            WidgetConfig::from_json_str(r#"{"markerAttribute": "class"}"#),
            Err(ConfigError::InvalidMarkerAttribute("class".to_string()))
        );
        assert_eq!(
            WidgetConfig::from_json_str(r#"{"mountConfirm": {"maxAttempts": 0, "delayMs": 1}}"#),
            Err(ConfigError::ZeroAttempts("mountConfirm"))
        );
        assert_eq!(
            WidgetConfig::from_json_str(r#"{"logLevel": "loud"}"#),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );
        assert_eq!(
            WidgetConfig::from_json_str(r#"{"dayRolloverMinutes": 1441}"#),
            Err(ConfigError::DayRolloverOutOfRange(1441))
        );
        assert_eq!(
            WidgetConfig::from_json_str(r#"{"backupCachePrefix": " "}"#),
            Err(ConfigError::EmptyBackupCachePrefix)
        );
        assert!(
            WidgetConfig::from_json_str(r#"{"backupBeforeSave": false, "backupCachePrefix": ""}"#)
                .is_ok()
        );
    }

    #[test]
    fn base_url_accepts_relative_paths() {
        assert_eq!(normalize_base_url("/plugins/schedule/"), Ok("/plugins/schedule".to_string()));
        assert_eq!(normalize_base_url(""), Ok(String::new()));
        assert!(normalize_base_url("//cdn.example.com").is_err());
    }
}
