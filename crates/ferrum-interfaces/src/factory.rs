//! Backend construction

use crate::ExecutionBackend;
use ferrum_types::{ExecutorConfig, ModelType, Result};
use std::path::{Path, PathBuf};

/// Where a backend's engine comes from
#[derive(Debug, Clone)]
pub enum EngineSource {
    /// Model artifact on disk (file or directory)
    ModelPath(PathBuf),
    /// Serialized engine held in memory, with its JSON model configuration
    Buffer {
        engine: Vec<u8>,
        model_config: serde_json::Value,
    },
}

impl EngineSource {
    /// Model path, if loading from disk
    pub fn model_path(&self) -> Option<&Path> {
        match self {
            EngineSource::ModelPath(path) => Some(path),
            EngineSource::Buffer { .. } => None,
        }
    }
}

/// Builds backends for the executor's constructors
///
/// Errors returned here surface to callers as initialization failures.
pub trait BackendFactory {
    /// Factory name, used in logs
    fn name(&self) -> &str;

    /// Create a backend for the given engine
    fn create(
        &self,
        source: &EngineSource,
        model_type: ModelType,
        config: &ExecutorConfig,
    ) -> Result<Box<dyn ExecutionBackend>>;

    /// Model types this factory can run
    fn supported_model_types(&self) -> &[ModelType] {
        &[ModelType::DecoderOnly]
    }
}
