//! Client configuration.
//!
//! `ClientConfig` is the persisted JSON file that tells a client where its
//! remote authority lives. `SyncConfig` holds the tuning knobs of the sync
//! manager and is built in code.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

pub const REMOTE_URL_ENV: &str = "FURROW_REMOTE_URL";
pub const API_KEY_ENV: &str = "FURROW_API_KEY";
pub const SYNC_INTERVAL_ENV: &str = "FURROW_SYNC_INTERVAL_SECS";

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 15;
const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_SENSOR_SILENCE_HOURS: i64 = 24;

/// Persisted client configuration.
///
/// The API key is the public anon key of the remote project. Service-role
/// secrets must never be stored here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default)]
    pub sync_interval_secs: Option<u64>,
}

impl ClientConfig {
    /// Load from `path`, returning defaults when the file does not exist.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::InvalidInput(format!(
                "failed to parse config at {}: {error}",
                path.display()
            ))
        })?;
        config.normalize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        std::fs::write(path, serde_json::to_string_pretty(&normalized)?)?;
        Ok(())
    }

    /// Apply `FURROW_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = normalize_text_option(lookup(REMOTE_URL_ENV)) {
            self.remote_url = Some(url);
        }
        if let Some(key) = normalize_text_option(lookup(API_KEY_ENV)) {
            self.api_key = Some(key);
        }
        match lookup(SYNC_INTERVAL_ENV).map(|raw| raw.trim().parse::<u64>()) {
            Some(Ok(secs)) if secs > 0 => self.sync_interval_secs = Some(secs),
            Some(_) => tracing::warn!("Ignoring invalid {SYNC_INTERVAL_ENV}"),
            None => {}
        }
        self.normalize();
        self
    }

    /// Remote base URL, validated.
    pub fn remote_url(&self) -> Result<Option<String>> {
        match normalize_text_option(self.remote_url.clone()) {
            Some(url) if is_http_url(&url) => Ok(Some(url)),
            Some(url) => Err(Error::InvalidInput(format!(
                "remote_url '{url}' must include http:// or https://"
            ))),
            None => Ok(None),
        }
    }

    /// Sync settings derived from this file.
    pub fn sync_config(&self) -> SyncConfig {
        let config = SyncConfig::default();
        match self.sync_interval_secs {
            Some(secs) if secs > 0 => config.with_sync_interval(Duration::from_secs(secs)),
            _ => config,
        }
    }

    fn normalize(&mut self) {
        self.remote_url = normalize_text_option(self.remote_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.api_key = normalize_text_option(self.api_key.take());
        self.db_path = normalize_text_option(self.db_path.take());
    }
}

/// Sync manager tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Period of the drain and health sweep timer
    pub sync_interval: Duration,
    /// Upper bound for a single remote push
    pub push_timeout: Duration,
    /// Rejections after which a row is marked dead; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Sensor silence that raises a critical notification
    pub sensor_silence: chrono::Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            push_timeout: Duration::from_secs(DEFAULT_PUSH_TIMEOUT_SECS),
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            sensor_silence: chrono::Duration::hours(DEFAULT_SENSOR_SILENCE_HOURS),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    #[must_use]
    pub const fn without_retry_cap(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    #[must_use]
    pub const fn with_sensor_silence(mut self, threshold: chrono::Duration) -> Self {
        self.sensor_silence = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempdir().unwrap();
        let config = ClientConfig::load_from_path(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn save_then_load_normalizes_values() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("furrow").join("config.json");
        let config = ClientConfig {
            remote_url: Some(" https://farm.example.com/ ".to_string()),
            api_key: Some("   ".to_string()),
            ..Default::default()
        };

        config.save_to_path(&path).unwrap();
        let loaded = ClientConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.remote_url.as_deref(), Some("https://farm.example.com"));
        assert_eq!(loaded.api_key, None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"remote_url": "https://x.io", "profile": "default"}"#).unwrap();

        let error = ClientConfig::load_from_path(&path).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn env_overrides_win_over_file() {
        let config = ClientConfig {
            remote_url: Some("https://file.example.com".to_string()),
            sync_interval_secs: Some(60),
            ..Default::default()
        }
        .with_overrides(|name| match name {
            REMOTE_URL_ENV => Some("https://env.example.com/".to_string()),
            SYNC_INTERVAL_ENV => Some("5".to_string()),
            _ => None,
        });

        assert_eq!(config.remote_url.as_deref(), Some("https://env.example.com"));
        assert_eq!(config.sync_config().sync_interval, Duration::from_secs(5));
    }

    #[test]
    fn invalid_interval_override_is_ignored() {
        let config = ClientConfig::default().with_overrides(|name| {
            (name == SYNC_INTERVAL_ENV).then(|| "soon".to_string())
        });
        assert_eq!(config.sync_config().sync_interval, Duration::from_secs(30));
    }

    #[test]
    fn remote_url_requires_scheme() {
        let config = ClientConfig {
            remote_url: Some("farm.example.com".to_string()),
            ..Default::default()
        };
        assert!(config.remote_url().is_err());
    }

    #[test]
    fn sync_config_builders() {
        let config = SyncConfig::default()
            .with_push_timeout(Duration::from_millis(50))
            .with_max_attempts(0)
            .with_sensor_silence(chrono::Duration::hours(1));
        assert_eq!(config.max_attempts, Some(1));
        assert_eq!(config.push_timeout, Duration::from_millis(50));
        assert_eq!(SyncConfig::default().without_retry_cap().max_attempts, None);
    }
}
