//! TOML-based application configuration.
//!
//! Stores:
//! - Alarm behavior (snooze offset, idle delivery, alert timeout)
//! - Notification text, channel and vibration pattern
//!
//! Configuration is stored at `~/.config/pillbox/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data_dir;
use crate::alarm::{AlertConfig, SchedulerConfig};
use crate::error::ConfigError;

/// Alarm delivery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmConfig {
    #[serde(default = "default_snooze_minutes")]
    pub snooze_minutes: u32,
    #[serde(default = "default_true")]
    pub allow_while_idle: bool,
    /// Alerts stop looping after this many seconds.
    #[serde(default = "default_alert_timeout_secs")]
    pub alert_timeout_secs: u64,
    /// How late the in-process timer service delivers inexact timers.
    #[serde(default = "default_inexact_slack_secs")]
    pub inexact_slack_secs: u64,
    /// Set to false to simulate a platform that denies exact alarms.
    #[serde(default = "default_true")]
    pub exact_permitted: bool,
}

/// Notification configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_channel_id")]
    pub channel_id: String,
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_body")]
    pub body: String,
    #[serde(default = "default_payload")]
    pub default_payload: String,
    #[serde(default = "default_vibration_pattern")]
    pub vibration_pattern_ms: Vec<u64>,
    #[serde(default = "default_true")]
    pub vibrate: bool,
    #[serde(default = "default_stop_label")]
    pub stop_label: String,
    #[serde(default = "default_snooze_label")]
    pub snooze_label: String,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/pillbox/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub alarm: AlarmConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

// Default functions
fn default_snooze_minutes() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_alert_timeout_secs() -> u64 {
    60
}
fn default_inexact_slack_secs() -> u64 {
    60
}
fn default_channel_id() -> String {
    "medicine_reminder".into()
}
fn default_channel_name() -> String {
    "Medicine Reminders".into()
}
fn default_title() -> String {
    "Medicine Reminder".into()
}
fn default_body() -> String {
    "It's time to take your medicine!".into()
}
fn default_payload() -> String {
    "Time to take your medicine!".into()
}
fn default_vibration_pattern() -> Vec<u64> {
    vec![0, 500, 1000, 500]
}
fn default_stop_label() -> String {
    "Stop".into()
}
fn default_snooze_label() -> String {
    "Snooze (5 min)".into()
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            snooze_minutes: default_snooze_minutes(),
            allow_while_idle: true,
            alert_timeout_secs: default_alert_timeout_secs(),
            inexact_slack_secs: default_inexact_slack_secs(),
            exact_permitted: true,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            channel_id: default_channel_id(),
            channel_name: default_channel_name(),
            title: default_title(),
            body: default_body(),
            default_payload: default_payload(),
            vibration_pattern_ms: default_vibration_pattern(),
            vibrate: true,
            stop_label: default_stop_label(),
            snooze_label: default_snooze_label(),
        }
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
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => value
                        .parse::<bool>()
                        .map(serde_json::Value::Bool)
                        .map_err(|e| invalid(e.to_string()))?,
                    serde_json::Value::Number(_) => value
                        .parse::<u64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?,
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default location of the config file.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or write and return the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Like [`Config::load`] for an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
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

    /// Set a value by dotted key in memory. Call [`Config::save`] to persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed
    /// into the field's type.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Every leaf key with its current value, sorted by key.
    pub fn entries(&self) -> Vec<(String, String)> {
        fn walk(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
            match value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, v, out);
                    }
                }
                serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
                other => out.push((prefix.to_string(), other.to_string())),
            }
        }

        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            walk("", &json, &mut out);
        }
        out.sort();
        out
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            snooze: chrono::Duration::minutes(i64::from(self.alarm.snooze_minutes)),
            allow_while_idle: self.alarm.allow_while_idle,
        }
    }

    pub fn alert_config(&self) -> AlertConfig {
        let n = &self.notifications;
        AlertConfig {
            channel_id: n.channel_id.clone(),
            title: n.title.clone(),
            body: n.body.clone(),
            default_payload: n.default_payload.clone(),
            stop_label: n.stop_label.clone(),
            snooze_label: n.snooze_label.clone(),
            timeout: Duration::from_secs(self.alarm.alert_timeout_secs),
            vibration_pattern_ms: if n.vibrate {
                n.vibration_pattern_ms.clone()
            } else {
                Vec::new()
            },
        }
    }

    pub fn inexact_slack(&self) -> chrono::Duration {
        i64::try_from(self.alarm.inexact_slack_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
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
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("[alarm]\nsnooze_minutes = 10\n").unwrap();
        assert_eq!(parsed.alarm.snooze_minutes, 10);
        assert!(parsed.alarm.allow_while_idle);
        assert_eq!(parsed.notifications.channel_id, "medicine_reminder");
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("alarm.snooze_minutes").as_deref(), Some("5"));
        assert_eq!(cfg.get("notifications.title").as_deref(), Some("Medicine Reminder"));
        assert!(cfg.get("alarm.missing_key").is_none());
        assert!(cfg.get("").is_none());
    }

    #[test]
    fn set_updates_typed_values() {
        let mut cfg = Config::default();
        cfg.set("alarm.allow_while_idle", "false").unwrap();
        cfg.set("alarm.snooze_minutes", "10").unwrap();
        cfg.set("notifications.title", "Pill time").unwrap();
        cfg.set("notifications.vibration_pattern_ms", "[0, 250]").unwrap();
        assert!(!cfg.alarm.allow_while_idle);
        assert_eq!(cfg.alarm.snooze_minutes, 10);
        assert_eq!(cfg.notifications.title, "Pill time");
        assert_eq!(cfg.notifications.vibration_pattern_ms, vec![0, 250]);
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("alarm.nonexistent_key", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(cfg.set("", "1"), Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn set_rejects_invalid_type() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("alarm.allow_while_idle", "not_a_bool"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(cfg.set("alarm.snooze_minutes", "-1").is_err());
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn load_from_missing_file_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = Config::default();
        cfg.set("alarm.exact_permitted", "false").unwrap();
        cfg.save_to(&path).unwrap();
        assert!(!Config::load_from(&path).unwrap().alarm.exact_permitted);
    }

    #[test]
    fn malformed_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "alarm = [").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::LoadFailed { .. })
        ));
    }

    #[test]
    fn entries_lists_leaf_keys() {
        let entries = Config::default().entries();
        assert!(entries.contains(&("alarm.snooze_minutes".to_string(), "5".to_string())));
        assert!(entries
            .iter()
            .any(|(k, _)| k == "notifications.vibration_pattern_ms"));
    }

    #[test]
    fn derived_alert_config_respects_vibrate_flag() {
        let mut cfg = Config::default();
        assert_eq!(cfg.alert_config(), AlertConfig::default());
        cfg.notifications.vibrate = false;
        assert!(cfg.alert_config().vibration_pattern_ms.is_empty());
        assert_eq!(cfg.scheduler_config().snooze, chrono::Duration::minutes(5));
    }
}
