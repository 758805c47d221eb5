//! Configuration for the deterministic execution system.
//!
//! Read from the project-local `.nwave/des-config.json`. A missing file
//! yields the defaults; a malformed file is a configuration error. CLI
//! arguments and environment variables take precedence over the file at
//! the call sites that consume individual values.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use des_utils::error::ConfigError;

/// Config file path relative to the project root.
pub const CONFIG_RELATIVE_PATH: &str = ".nwave/des-config.json";

/// Default wall-clock ceiling for one step, in seconds.
pub const DEFAULT_MAX_EXECUTION_TIME: u64 = 3600;

/// Default subagent completion timeout, in seconds.
pub const DEFAULT_SUBAGENT_TIMEOUT: u64 = 300;

/// Project-local DES configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesConfig {
    /// Overrides the audit log directory resolution chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log_dir: Option<Utf8PathBuf>,
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time: u64,
    #[serde(default = "default_subagent_timeout")]
    pub subagent_timeout: u64,
    #[serde(default = "default_true")]
    pub validation_enabled: bool,
    #[serde(default = "default_true")]
    pub tool_monitoring_enabled: bool,
    /// Replaces the built-in recognised agent list when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognized_agents: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_max_execution_time() -> u64 {
    DEFAULT_MAX_EXECUTION_TIME
}

fn default_subagent_timeout() -> u64 {
    DEFAULT_SUBAGENT_TIMEOUT
}

fn default_true() -> bool {
    true
}

impl Default for DesConfig {
    fn default() -> Self {
        Self {
            audit_log_dir: None,
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            subagent_timeout: DEFAULT_SUBAGENT_TIMEOUT,
            validation_enabled: true,
            tool_monitoring_enabled: true,
            recognized_agents: None,
            extra: Map::new(),
        }
    }
}

impl DesConfig {
    /// Load the project config, defaulting when the file is absent.
    pub fn load(project_root: &Utf8Path) -> Result<Self, ConfigError> {
        let path = project_root.join(CONFIG_RELATIVE_PATH);
        let content = match std::fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Unreadable {
                    path: path.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let config: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::InvalidFile {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        config.validate(&path)?;
        Ok(config)
    }

    fn validate(&self, path: &Utf8Path) -> Result<(), ConfigError> {
        if self.max_execution_time == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{path}: max_execution_time"),
                reason: "must be positive".to_string(),
            });
        }
        if self.subagent_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{path}: subagent_timeout"),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
