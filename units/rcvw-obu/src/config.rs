//! Configuration management for the on-board unit
//!
//! The unit configuration wraps the decision-core tree with the settings only
//! the process needs (alert transport, logging). Values come from three
//! layers, later ones winning:
//!
//! 1. Built-in defaults
//! 2. A JSON file (partial files are fine)
//! 3. `RCVW_*` environment variables
//!
//! [`ConfigWatcher`] polls the file and hands validated reloads to the
//! evaluator through a [`ConfigSlot`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{info, warn};
use rcvw_core::config::ConfigError;
use rcvw_core::{ConfigSlot, KnownCrossing, RcvwConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Alert transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// `host:port` receiving one JSON datagram per notification
    pub udp_target: Option<String>,
    /// How often the status board is logged (ms)
    pub status_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            udp_target: None,
            status_interval_ms: 5000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete unit configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    #[serde(flatten)]
    pub core: RcvwConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

impl SystemConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Defaults, then the optional file, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.core.validate()?;
        Ok(config)
    }

    /// Override values from `RCVW_*` variables
    ///
    /// Unparseable values are logged and skipped.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(target) = lookup("RCVW_UDP_TARGET") {
            self.transport.udp_target = if target.is_empty() { None } else { Some(target) };
        }
        if let Some(level) = lookup("RCVW_LOG_LEVEL") {
            self.logging.level = level;
        }
        override_parsed(&lookup, "RCVW_STATUS_INTERVAL_MS", &mut self.transport.status_interval_ms);
        override_parsed(&lookup, "RCVW_CADENCE_MS", &mut self.core.scheduler.cadence_ms);
        override_parsed(&lookup, "RCVW_RTK_REQUIRED", &mut self.core.quality.rtk_required);
        override_parsed(&lookup, "RCVW_FRICTION", &mut self.core.stopping.friction);
        override_parsed(&lookup, "RCVW_VEHICLE_LENGTH_M", &mut self.core.vehicle.length_m);
        override_parsed(
            &lookup,
            "RCVW_ANTENNA_FROM_FRONT_M",
            &mut self.core.vehicle.antenna_from_front_m,
        );
        override_parsed(
            &lookup,
            "RCVW_HRI_WARNING_SPEED_MPS",
            &mut self.core.warning.hri_warning_speed_mps,
        );
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!("Ignoring {}={:?}: not a valid value", key, raw),
        }
    }
}

#[derive(Deserialize)]
struct HriList {
    #[serde(rename = "HRIs")]
    hris: Vec<KnownCrossing>,
}

/// Parse a crossing list in the `{"HRIs":[{"HRIName":..}]}` shape
pub fn parse_hri_list(json: &str) -> Result<Vec<KnownCrossing>, ConfigError> {
    serde_json::from_str::<HriList>(json)
        .map(|list| list.hris)
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

/// `(dotted key, new value)` for every leaf that differs
///
/// Arrays are compared whole.
pub fn diff_configs(old: &SystemConfig, new: &SystemConfig) -> Vec<(String, String)> {
    let mut changes = Vec::new();
    match (serde_json::to_value(old), serde_json::to_value(new)) {
        (Ok(old), Ok(new)) => diff_values("", &old, &new, &mut changes),
        _ => warn!("Could not serialize configuration for comparison"),
    }
    changes
}

fn diff_values(prefix: &str, old: &Value, new: &Value, out: &mut Vec<(String, String)>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, new_value) in new_map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                diff_values(&path, old_map.get(key).unwrap_or(&Value::Null), new_value, out);
            }
        }
        _ if old != new => {
            let rendered = match new {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push((prefix.to_string(), rendered));
        }
        _ => {}
    }
}

/// Polls the configuration file and queues validated reloads
pub struct ConfigWatcher {
    path: PathBuf,
    modified: Option<SystemTime>,
    current: SystemConfig,
    /// Crossings supplied separately; they replace the file's list
    crossing_overlay: Vec<KnownCrossing>,
    slot: ConfigSlot,
}

impl ConfigWatcher {
    pub fn new(
        path: PathBuf,
        current: SystemConfig,
        crossing_overlay: Vec<KnownCrossing>,
        slot: ConfigSlot,
    ) -> Self {
        let modified = modified_time(&path);
        Self {
            path,
            modified,
            current,
            crossing_overlay,
            slot,
        }
    }

    pub fn current(&self) -> &SystemConfig {
        &self.current
    }

    /// Check the file once
    ///
    /// # Returns
    /// The changes that were queued, empty when nothing changed or the
    /// reload was rejected
    pub fn poll(&mut self) -> Vec<(String, String)> {
        let modified = modified_time(&self.path);
        if modified.is_none() || modified == self.modified {
            return Vec::new();
        }
        self.modified = modified;

        let mut next = match SystemConfig::load(Some(&self.path)) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring config reload from {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };
        if !self.crossing_overlay.is_empty() {
            next.core.known_crossings = self.crossing_overlay.clone();
        }

        let changes = diff_configs(&self.current, &next);
        if changes.is_empty() {
            return changes;
        }

        info!(
            "Config file {} changed ({} values)",
            self.path.display(),
            changes.len()
        );
        self.slot.submit(next.core.clone(), changes.clone());
        self.current = next;
        changes
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use rcvw_core::stopping::StoppingFormula;

    fn write_config(path: &Path, json: &str) {
        fs::write(path, json).unwrap();
    }

    #[test]
    fn test_from_file_partial() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(
            file.path(),
            r#"{
                "stopping": { "formula": "legacy" },
                "transport": { "udp_target": "127.0.0.1:9000" }
            }"#,
        );

        let config = SystemConfig::from_file(file.path()).unwrap();
        assert_eq!(config.core.stopping.formula, StoppingFormula::Legacy);
        assert_eq!(config.core.stopping.friction, 0.7);
        assert_eq!(config.transport.udp_target.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(config.transport.status_interval_ms, 5000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = SystemConfig::from_file(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_malformed_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(file.path(), "{ not json");
        assert!(matches!(
            SystemConfig::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RCVW_UDP_TARGET", "10.0.0.2:7000"),
            ("RCVW_CADENCE_MS", "20"),
            ("RCVW_RTK_REQUIRED", "true"),
            ("RCVW_FRICTION", "abc"),
        ]
        .into_iter()
        .collect();

        let mut config = SystemConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.transport.udp_target.as_deref(), Some("10.0.0.2:7000"));
        assert_eq!(config.core.scheduler.cadence_ms, 20);
        assert!(config.core.quality.rtk_required);
        // Unparseable value keeps the default
        assert_eq!(config.core.stopping.friction, 0.7);
    }

    #[test]
    fn test_parse_hri_list() {
        let json = r#"{"HRIs":[
            {"HRIName":"Main St","Latitude":39.1,"Longitude":-77.2},
            {"HRIName":"Depot Rd","Latitude":39.3,"Longitude":-77.4,"Radius":150.0}
        ]}"#;
        let crossings = parse_hri_list(json).unwrap();
        assert_eq!(crossings.len(), 2);
        assert_eq!(crossings[0].name, "Main St");
        assert_eq!(crossings[0].radius_m, None);
        assert_eq!(crossings[1].radius_m, Some(150.0));

        assert!(parse_hri_list(r#"{"crossings":[]}"#).is_err());
    }

    #[test]
    fn test_diff_reports_changed_leaves() {
        let old = SystemConfig::default();
        let mut new = old.clone();
        new.core.stopping.friction = 0.5;
        new.logging.level = "debug".to_string();

        let mut changes = diff_configs(&old, &new);
        changes.sort();
        assert_eq!(
            changes,
            vec![
                ("logging.level".to_string(), "debug".to_string()),
                ("stopping.friction".to_string(), "0.5".to_string()),
            ]
        );
        assert!(diff_configs(&old, &old).is_empty());
    }

    #[test]
    fn test_watcher_queues_changes() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(file.path(), r#"{ "warning": { "hri_warning_speed_mps": 1.0 } }"#);
        let initial = SystemConfig::from_file(file.path()).unwrap();

        let mut watcher = ConfigWatcher::new(
            file.path().to_path_buf(),
            initial,
            Vec::new(),
            ConfigSlot::new(),
        );
        assert!(watcher.poll().is_empty());

        // Filesystems with coarse mtimes need the clock to move
        std::thread::sleep(std::time::Duration::from_millis(1100));
        write_config(file.path(), r#"{ "warning": { "hri_warning_speed_mps": 2.0 } }"#);

        let changes = watcher.poll();
        assert_eq!(
            changes,
            vec![("warning.hri_warning_speed_mps".to_string(), "2.0".to_string())]
        );
        assert_eq!(watcher.current().core.warning.hri_warning_speed_mps, 2.0);
    }

    #[test]
    fn test_watcher_ignores_invalid_reload() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(file.path(), "{}");
        let mut watcher = ConfigWatcher::new(
            file.path().to_path_buf(),
            SystemConfig::default(),
            Vec::new(),
            ConfigSlot::new(),
        );

        std::thread::sleep(std::time::Duration::from_millis(1100));
        write_config(file.path(), r#"{ "stopping": { "friction": 0.0 } }"#);

        assert!(watcher.poll().is_empty());
        assert_eq!(watcher.current().core.stopping.friction, 0.7);
    }
}
