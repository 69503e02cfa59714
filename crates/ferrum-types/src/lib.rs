//! Core type definitions for the Ferrum executor
//!
//! This crate contains the ids, request/response values, configuration,
//! statistics and error definitions shared by the executor, its backends and
//! the CLI. It is kept lightweight so backends can depend on it without
//! pulling in the executor itself.

pub mod config;
pub mod errors;
pub mod ids;
pub mod metrics;
pub mod models;
pub mod requests;
pub mod sampling;

// Re-export commonly used types
pub use config::*;
pub use errors::*;
pub use ids::*;
pub use metrics::*;
pub use models::*;
pub use requests::*;
pub use sampling::*;

/// Result type used throughout Ferrum
pub type Result<T> = std::result::Result<T, FerrumError>;
