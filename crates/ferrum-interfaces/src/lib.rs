//! Core interface definitions for the Ferrum executor
//!
//! This crate defines the capability traits an inference backend implements
//! to be driven by the executor. Backends are injected as trait objects, so
//! any implementation (a native engine, a remote worker, a test double) can be
//! substituted without touching the executor.
//!
//! - [`ExecutionBackend`]: submit / poll / cancel / release
//! - [`BackendFactory`]: build a backend from a model path or an in-memory engine

pub mod backend;
pub mod factory;

pub use backend::{BackendCapabilities, BackendStep, ExecutionBackend};
pub use factory::{BackendFactory, EngineSource};

// Re-export types backends need to implement the traits
pub use ferrum_types::{
    BackendIterationStats, ExecutorConfig, ExecutorRequest, FerrumError, FinishReason,
    GenerationResult, ModelType, RequestId, RequestStage, RequestStats, Response,
    ResponsePayload, Result, TokenId, TokenUsage,
};
