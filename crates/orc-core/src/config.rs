use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::Weight;

/// Top-level configuration loaded from `~/.orc/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub orphan: OrphanConfig,
}

impl Config {
    /// Load config from `~/.orc/config.toml`, falling back to defaults when
    /// the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.orphan.validate()?;
        if let Some(w) = &self.templates.fallback_weight {
            if w.as_str().is_empty() {
                return Err(ConfigError::Validation(
                    "templates.fallback_weight must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        home().join(".orc").join("config.toml")
    }
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Expand a leading `~` against the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return home();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home().join(rest),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Validation(
                "general.log_level must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl StorageConfig {
    pub fn root_path(&self) -> PathBuf {
        expand_tilde(&self.root)
    }
}

fn default_storage_root() -> String {
    "~/.orc".into()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Searched in order for `<weight>.toml` before the built-in set.
    #[serde(default)]
    pub dirs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_weight: Option<Weight>,
}

impl TemplatesConfig {
    pub fn dir_paths(&self) -> Vec<PathBuf> {
        self.dirs.iter().map(|d| expand_tilde(d)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanConfig {
    #[serde(default = "default_stale_heartbeat_secs")]
    pub stale_heartbeat_secs: u64,
    #[serde(default = "default_patrol_interval_secs")]
    pub patrol_interval_secs: u64,
}

impl Default for OrphanConfig {
    fn default() -> Self {
        Self {
            stale_heartbeat_secs: default_stale_heartbeat_secs(),
            patrol_interval_secs: default_patrol_interval_secs(),
        }
    }
}

impl OrphanConfig {
    pub fn stale_heartbeat(&self) -> Duration {
        Duration::from_secs(self.stale_heartbeat_secs)
    }

    pub fn patrol_interval(&self) -> Duration {
        Duration::from_secs(self.patrol_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stale_heartbeat_secs == 0 {
            return Err(ConfigError::Validation(
                "orphan.stale_heartbeat_secs must be > 0".into(),
            ));
        }
        if self.patrol_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "orphan.patrol_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_stale_heartbeat_secs() -> u64 {
    300
}
fn default_patrol_interval_secs() -> u64 {
    60
}

/// Convenience for callers that accept an optional explicit config path.
pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(p) => Config::load_from(p),
        None => Config::load(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
