//! CLI configuration management
//!
//! `ferrum-exec.toml` carries the executor configuration, the defaults used
//! by `run`, and the echo model used when no model path is given.

use ferrum_executor::backends::EchoModelConfig;
use ferrum_types::{ExecutorConfig, FerrumError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "ferrum-exec.toml";

/// CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Executor configuration
    pub executor: ExecutorConfig,

    /// Defaults for the run command
    pub run: RunDefaults,

    /// Echo model used when no model path is given
    pub model: EchoModelConfig,
}

/// Defaults for the run command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDefaults {
    /// Tokens generated per request
    pub max_new_tokens: usize,

    /// Sampling temperature, 0 for greedy
    pub temperature: f32,

    /// Request partial responses
    pub streaming: bool,

    /// Give up waiting for a request after this long
    pub timeout_ms: u64,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            max_new_tokens: 16,
            temperature: 0.0,
            streaming: false,
            timeout_ms: 30_000,
        }
    }
}

impl CliConfig {
    /// Load configuration from file, falling back to defaults when it does
    /// not exist. `FERRUM_EXECUTOR_*` variables override the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                FerrumError::io(format!("Failed to read config file {}: {}", path.display(), e))
            })?;
            Self::from_toml_str(&content)?
        } else {
            debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config
            .executor
            .apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| FerrumError::config(format!("Failed to parse config: {}", e)))
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FerrumError::config(format!("Failed to serialize config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                FerrumError::io(format!("Failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(path, content)
            .map_err(|e| FerrumError::io(format!("Failed to write config file: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.executor.validate()?;
        self.model
            .validate()
            .map_err(|e| FerrumError::config(e.to_string()))?;

        if self.run.max_new_tokens == 0 {
            return Err(FerrumError::config("run.max_new_tokens must be positive"));
        }
        if self.run.temperature < 0.0 {
            return Err(FerrumError::config("run.temperature must not be negative"));
        }
        Ok(())
    }
}
