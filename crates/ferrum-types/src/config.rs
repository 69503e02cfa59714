//! Configuration types for the Ferrum executor

use crate::{FerrumError, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};

/// Environment variable prefix recognized by [`ExecutorConfig::from_env`]
pub const ENV_PREFIX: &str = "FERRUM_EXECUTOR_";

/// Executor configuration
///
/// Knobs the executor enforces itself (queue limits, stats retention, shutdown)
/// live next to the ones it only forwards to the backend (`scheduler_config`,
/// `kv_cache_config`, `backend_options`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Largest beam width a request may ask for
    pub max_beam_width: usize,
    /// Longest accepted prompt, unlimited when unset
    pub max_input_len: Option<usize>,
    /// Maximum number of pending requests, unlimited when unset
    pub max_queue_size: Option<usize>,
    /// Capacity scheduling policy
    pub scheduler_config: SchedulerConfig,
    /// Batching mode
    pub batching_type: BatchingType,
    /// KV cache configuration
    pub kv_cache_config: KvCacheConfig,
    /// Split long contexts into chunks
    pub enable_chunked_context: bool,
    /// Normalize reported log probabilities
    pub normalize_log_probs: bool,
    /// Number of iteration stats snapshots retained until drained
    pub iter_stats_max_iterations: usize,
    /// Number of per-request stats snapshots retained until drained
    pub request_stats_max_iterations: usize,
    /// How long the engine thread blocks for new commands while idle
    pub idle_poll_interval_ms: u64,
    /// What shutdown does with in-flight requests
    pub shutdown_policy: ShutdownPolicy,
    /// Upper bound on draining in-flight work during shutdown
    pub drain_timeout_ms: u64,
    /// Backend-specific options, passed through untouched
    pub backend_options: HashMap<String, serde_json::Value>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_beam_width: 1,
            max_input_len: None,
            max_queue_size: None,
            scheduler_config: SchedulerConfig::default(),
            batching_type: BatchingType::Inflight,
            kv_cache_config: KvCacheConfig::default(),
            enable_chunked_context: false,
            normalize_log_probs: true,
            iter_stats_max_iterations: 1000,
            request_stats_max_iterations: 0,
            idle_poll_interval_ms: 10,
            shutdown_policy: ShutdownPolicy::Drain,
            drain_timeout_ms: 5000,
            backend_options: HashMap::new(),
        }
    }
}

impl ExecutorConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FerrumError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON string
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| FerrumError::config(format!("Failed to parse config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with `FERRUM_EXECUTOR_*` environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment-like lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(value) = var("MAX_BEAM_WIDTH") {
            self.max_beam_width = parse_env("MAX_BEAM_WIDTH", &value)?;
        }
        if let Some(value) = var("MAX_INPUT_LEN") {
            self.max_input_len = Some(parse_env("MAX_INPUT_LEN", &value)?);
        }
        if let Some(value) = var("MAX_QUEUE_SIZE") {
            self.max_queue_size = Some(parse_env("MAX_QUEUE_SIZE", &value)?);
        }
        if let Some(value) = var("ITER_STATS_MAX_ITERATIONS") {
            self.iter_stats_max_iterations = parse_env("ITER_STATS_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = var("REQUEST_STATS_MAX_ITERATIONS") {
            self.request_stats_max_iterations =
                parse_env("REQUEST_STATS_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = var("IDLE_POLL_INTERVAL_MS") {
            self.idle_poll_interval_ms = parse_env("IDLE_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = var("DRAIN_TIMEOUT_MS") {
            self.drain_timeout_ms = parse_env("DRAIN_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = var("SHUTDOWN_POLICY") {
            self.shutdown_policy = match value.to_lowercase().as_str() {
                "drain" => ShutdownPolicy::Drain,
                "cancel" => ShutdownPolicy::Cancel,
                other => {
                    return Err(FerrumError::config(format!(
                        "Invalid shutdown policy '{}', expected drain or cancel",
                        other
                    )))
                }
            };
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_beam_width == 0 {
            return Err(FerrumError::config("max_beam_width must be greater than 0"));
        }
        if self.max_input_len == Some(0) {
            return Err(FerrumError::config("max_input_len must be greater than 0"));
        }
        if self.max_queue_size == Some(0) {
            return Err(FerrumError::config("max_queue_size must be greater than 0"));
        }
        if self.idle_poll_interval_ms == 0 {
            return Err(FerrumError::config(
                "idle_poll_interval_ms must be greater than 0",
            ));
        }
        let fraction = self.kv_cache_config.free_gpu_memory_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(FerrumError::config(
                "free_gpu_memory_fraction must be in range (0, 1]",
            ));
        }
        Ok(())
    }

    /// Idle wait of the engine loop
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    /// Drain deadline used by [`ShutdownPolicy::Drain`]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        FerrumError::config(format!("Invalid value '{}' for {}{}", value, ENV_PREFIX, name))
    })
}

/// Scheduler configuration forwarded to the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Capacity scheduling policy
    pub capacity_scheduler_policy: CapacitySchedulerPolicy,
}

/// How the backend admits requests against KV-cache capacity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacitySchedulerPolicy {
    /// Pack as many requests as possible, pausing some when memory runs out
    MaxUtilization,
    /// Only admit requests whose full generation is guaranteed to fit
    #[default]
    GuaranteedNoEvict,
}

/// Batching mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchingType {
    /// Batch is fixed until every member finishes
    Static,
    /// Requests join and leave the running batch every iteration
    #[default]
    Inflight,
}

/// KV cache configuration forwarded to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvCacheConfig {
    /// Maximum number of tokens the cache may hold
    pub max_tokens: Option<usize>,
    /// Fraction of free device memory the cache may take
    pub free_gpu_memory_fraction: f32,
    /// Reuse cache blocks across requests sharing a prefix
    pub enable_block_reuse: bool,
}

impl Default for KvCacheConfig {
    fn default() -> Self {
        Self {
            max_tokens: None,
            free_gpu_memory_fraction: 0.9,
            enable_block_reuse: false,
        }
    }
}

/// What happens to in-flight requests on shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Keep running the backend until in-flight requests finish or the drain
    /// timeout expires, then cancel the rest
    #[default]
    Drain,
    /// Cancel every in-flight request immediately
    Cancel,
}
