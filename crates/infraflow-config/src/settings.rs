//! Configuration schema
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub state: StateSettings,
    pub logging: LoggingSettings,
    pub engine: EngineSettings,
    pub discovery: DiscoverySettings,
    pub drift: DriftSettings,
    pub conflict: ConflictSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    pub file_path: PathBuf,
    pub backup_enabled: bool,
    /// A lock file older than this is considered abandoned
    pub lock_timeout_secs: u64,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            file_path: PathBuf::from(".infraflow/state.json"),
            backup_enabled: true,
            lock_timeout_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, e.g. `info` or `infraflow_graph=debug`
    pub level: String,
    pub format: LogFormat,
    /// Log to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub region: String,
    pub auto_resolve_conflicts: bool,
    /// Derive edges from reference properties such as `vpc_id`
    pub implicit_dependencies: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            region: String::new(),
            auto_resolve_conflicts: false,
            implicit_dependencies: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Types to scan; empty asks the lister for everything in one call
    pub resource_types: Vec<String>,
    pub name_match_threshold: f64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            resource_types: Vec::new(),
            name_match_threshold: 0.75,
        }
    }
}

/// Glob patterns over property names. `None` keeps the built-in lists;
/// unmatched fields are medium severity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftSettings {
    pub high_severity_fields: Option<Vec<String>>,
    pub low_severity_fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictSettings {
    /// Types weighted as stateful in impact analysis; `None` keeps the built-in list
    pub stateful_types: Option<Vec<String>>,
}

impl Config {
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        // A comment-only document parses as null
        match serde_yaml::from_str::<serde_yaml::Value>(content)? {
            serde_yaml::Value::Null => Ok(Self::default()),
            value => serde_yaml::from_value(value),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.discovery.name_match_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "discovery.name_match_threshold must be within 0.0..=1.0, got {}",
                threshold
            )));
        }
        if self.state.file_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("state.file_path is empty".into()));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level is empty".into()));
        }
        Ok(())
    }

    /// Apply `INFRAFLOW_STATE_FILE`, `INFRAFLOW_LOG_LEVEL` and
    /// `INFRAFLOW_REGION` (falling back to `AWS_REGION`).
    pub fn apply_env_overrides(&mut self) {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(path) = var("INFRAFLOW_STATE_FILE") {
            self.state.file_path = PathBuf::from(path);
        }
        if let Some(level) = var("INFRAFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(region) = var("INFRAFLOW_REGION").or_else(|| var("AWS_REGION")) {
            self.engine.region = region;
        }
    }
}
