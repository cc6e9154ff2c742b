//! Configuration resolution for `PipePilot`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`$XDG_CONFIG_HOME/pipepilot/settings.json`)
//! 3. Explicit config file supplied by the caller
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default capacity of the inbound line channel.
pub const DEFAULT_INPUT_BUFFER: usize = 32;

/// Default maximum length of a single relayed line, in bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Relay configuration shared by the library and the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Capacity of the inbound (caller to child) line channel. Senders wait
    /// once this many lines are queued.
    pub input_buffer: usize,
    /// Longest line, excluding the newline, delivered to an output callback.
    /// Longer lines are discarded. The limit applies to the raw line before
    /// trailing whitespace is trimmed, so a `\r` or trailing spaces count
    /// against it.
    pub max_line_bytes: usize,
    /// Kill the child when its handle is dropped.
    pub kill_on_drop: bool,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            input_buffer: DEFAULT_INPUT_BUFFER,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            kill_on_drop: false,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Reject values the relay cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.input_buffer == 0 {
            return Err(Error::Config("input_buffer must be at least 1".into()));
        }
        if self.max_line_bytes == 0 {
            return Err(Error::Config("max_line_bytes must be at least 1".into()));
        }
        Ok(())
    }
}

/// Partial configuration as read from a settings file. Absent keys leave the
/// lower layer untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigOverlay {
    input_buffer: Option<usize>,
    max_line_bytes: Option<usize>,
    kill_on_drop: Option<bool>,
    log_level: Option<String>,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<RelayConfig> {
    let mut config = RelayConfig::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    if let Some(path) = explicit {
        let overlay = load_config_file(path)?;
        merge_config(&mut config, overlay);
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pipepilot").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<ConfigOverlay> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut RelayConfig, overlay: ConfigOverlay) {
    if let Some(n) = overlay.input_buffer {
        base.input_buffer = n;
    }
    if let Some(n) = overlay.max_line_bytes {
        base.max_line_bytes = n;
    }
    if let Some(b) = overlay.kill_on_drop {
        base.kill_on_drop = b;
    }
    if let Some(level) = overlay.log_level {
        base.log_level = level;
    }
}

/// Apply `PIPEPILOT_*` overrides. Unparseable values are logged and ignored.
pub fn apply_env_overrides<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("PIPEPILOT_INPUT_BUFFER") {
        match val.parse() {
            Ok(n) => config.input_buffer = n,
            Err(_) => tracing::warn!(value = %val, "Ignoring invalid PIPEPILOT_INPUT_BUFFER"),
        }
    }
    if let Some(val) = lookup("PIPEPILOT_MAX_LINE_BYTES") {
        match val.parse() {
            Ok(n) => config.max_line_bytes = n,
            Err(_) => tracing::warn!(value = %val, "Ignoring invalid PIPEPILOT_MAX_LINE_BYTES"),
        }
    }
    if let Some(val) = lookup("PIPEPILOT_KILL_ON_DROP") {
        match val.as_str() {
            "1" | "true" | "yes" => config.kill_on_drop = true,
            "0" | "false" | "no" => config.kill_on_drop = false,
            _ => tracing::warn!(value = %val, "Ignoring invalid PIPEPILOT_KILL_ON_DROP"),
        }
    }
    if let Some(val) = lookup("PIPEPILOT_LOG_LEVEL") {
        config.log_level = val;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = RelayConfig::default();
        assert_eq!(config.input_buffer, 32);
        assert_eq!(config.max_line_bytes, 1024 * 1024);
        assert!(!config.kill_on_drop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = RelayConfig {
            input_buffer: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = RelayConfig {
            max_line_bytes: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn partial_file_only_overrides_present_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "max_line_bytes": 4096 }"#).unwrap();

        let mut config = RelayConfig {
            input_buffer: 8,
            ..RelayConfig::default()
        };
        merge_config(&mut config, load_config_file(&path).unwrap());

        assert_eq!(config.max_line_bytes, 4096);
        assert_eq!(config.input_buffer, 8);
    }

    #[test]
    fn malformed_file_names_its_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "max_line_length": 10 }"#).unwrap();

        assert!(load_config_file(&path).is_err());
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("PIPEPILOT_INPUT_BUFFER", "4"),
            ("PIPEPILOT_MAX_LINE_BYTES", "lots"),
            ("PIPEPILOT_KILL_ON_DROP", "true"),
            ("PIPEPILOT_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = RelayConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.input_buffer, 4);
        assert_eq!(config.max_line_bytes, DEFAULT_MAX_LINE_BYTES);
        assert!(config.kill_on_drop);
        assert_eq!(config.log_level, "debug");
    }
}
