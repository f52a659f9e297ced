//! TOML-based application configuration.
//!
//! Stores:
//! - The decay curve (initial allowance, daily decrease, floor)
//! - Tracking cadence (tick interval, flush threshold)
//! - The day boundary used for rollover
//! - Notification preferences
//!
//! Configuration is stored at `~/.config/cailo/config.toml`.

use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Local, Offset};
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;
use crate::quota::{DecayPolicy, QuotaScheduler};

/// Decay curve configuration, in minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetoxConfig {
    #[serde(default = "default_initial_minutes")]
    pub initial_minutes: u32,
    #[serde(default = "default_decay_per_day")]
    pub decay_per_day: u32,
    #[serde(default = "default_floor_minutes")]
    pub floor_minutes: u32,
}

/// Usage tracking cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_flush_threshold_secs")]
    pub flush_threshold_secs: u64,
}

/// Day boundary configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Offset from UTC that defines "today". Unset means the machine's
    /// local offset at startup.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

/// Notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/cailo/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detox: DetoxConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

// Default functions
fn default_initial_minutes() -> u32 {
    60
}
fn default_decay_per_day() -> u32 {
    10
}
fn default_floor_minutes() -> u32 {
    5
}
fn default_tick_interval_secs() -> u64 {
    60
}
fn default_flush_threshold_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for DetoxConfig {
    fn default() -> Self {
        Self {
            initial_minutes: default_initial_minutes(),
            decay_per_day: default_decay_per_day(),
            floor_minutes: default_floor_minutes(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            flush_threshold_secs: default_flush_threshold_secs(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as integer")));
                        }
                    }
                    // Optional fields serialize as null; accept any JSON scalar.
                    serde_json::Value::Null => serde_json::from_str(value)
                        .unwrap_or_else(|_| serde_json::Value::String(value.into())),
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }

        Err(ConfigError::UnknownKey(key.to_string()))
    }

    /// Location of `config.toml`.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation, or if the default config cannot be written.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let cfg = Self::default();
            cfg.save_to(&path)?;
            Ok(cfg)
        }
    }

    /// Load and validate a specific config file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "using default configuration");
                Self::default()
            }
        }
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving. Returns error if key is
    /// unknown or the result fails validation.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let next: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Set a config value by key and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed
    /// or is out of range, or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| {
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        };
        if self.detox.floor_minutes == 0 {
            return invalid("detox.floor_minutes", "must be at least 1");
        }
        if self.detox.floor_minutes > self.detox.initial_minutes {
            return invalid("detox.floor_minutes", "must not exceed detox.initial_minutes");
        }
        if self.tracking.tick_interval_secs == 0 {
            return invalid("tracking.tick_interval_secs", "must be greater than zero");
        }
        if self.tracking.flush_threshold_secs == 0 {
            return invalid("tracking.flush_threshold_secs", "must be greater than zero");
        }
        if let Some(offset) = self.schedule.utc_offset_minutes {
            if FixedOffset::east_opt(offset.saturating_mul(60)).is_none() {
                return invalid("schedule.utc_offset_minutes", "must be within +/- 24h");
            }
        }
        Ok(())
    }

    pub fn decay_policy(&self) -> DecayPolicy {
        DecayPolicy {
            initial_minutes: self.detox.initial_minutes,
            decay_per_day: self.detox.decay_per_day,
            floor_minutes: self.detox.floor_minutes,
        }
    }

    /// The offset that defines calendar days for rollover.
    pub fn day_offset(&self) -> FixedOffset {
        self.schedule
            .utc_offset_minutes
            .and_then(|m| FixedOffset::east_opt(m.saturating_mul(60)))
            .unwrap_or_else(|| Local::now().offset().fix())
    }

    pub fn scheduler(&self) -> QuotaScheduler {
        QuotaScheduler::new(self.decay_policy(), self.day_offset())
    }

    pub fn flush_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.tracking.flush_threshold_secs.min(u64::from(u32::MAX)) as i64)
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tracking.tick_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.detox.initial_minutes, 60);
        assert_eq!(parsed.tracking.flush_threshold_secs, 30);
        assert!(parsed.schedule.utc_offset_minutes.is_none());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("[detox]\nfloor_minutes = 10\n").unwrap();
        assert_eq!(parsed.detox.floor_minutes, 10);
        assert_eq!(parsed.detox.initial_minutes, 60);
        assert_eq!(parsed.tracking.tick_interval_secs, 60);
        assert!(parsed.notifications.enabled);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("detox.decay_per_day").as_deref(), Some("10"));
        assert_eq!(cfg.get("notifications.enabled").as_deref(), Some("true"));
        assert!(cfg.get("detox.missing_key").is_none());
    }

    #[test]
    fn apply_updates_nested_number() {
        let mut cfg = Config::default();
        cfg.apply("detox.initial_minutes", "90").unwrap();
        assert_eq!(cfg.detox.initial_minutes, 90);
    }

    #[test]
    fn apply_sets_optional_offset() {
        let mut cfg = Config::default();
        cfg.apply("schedule.utc_offset_minutes", "420").unwrap();
        assert_eq!(cfg.schedule.utc_offset_minutes, Some(420));
        assert_eq!(cfg.day_offset(), FixedOffset::east_opt(420 * 60).unwrap());
    }

    #[test]
    fn apply_rejects_unknown_key() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.apply("detox.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn apply_rejects_invalid_type() {
        let mut cfg = Config::default();
        assert!(cfg.apply("notifications.enabled", "not_a_bool").is_err());
        assert!(cfg.notifications.enabled);
    }

    #[test]
    fn apply_rejects_floor_above_initial() {
        let mut cfg = Config::default();
        let err = cfg.apply("detox.floor_minutes", "120").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert_eq!(cfg.detox.floor_minutes, 5);
    }

    #[test]
    fn load_from_rejects_zero_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tracking]\nflush_threshold_secs = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn decay_policy_mirrors_detox_section() {
        let cfg = Config::default();
        let policy = cfg.decay_policy();
        assert_eq!(policy, DecayPolicy::default());
        assert_eq!(cfg.flush_threshold(), chrono::Duration::seconds(30));
    }
}
