//! # Ferrum Executor CLI Library
//!
//! In-process driver for the Ferrum executor.
//!
//! ## Commands
//!
//! - `run`: Submit token prompts to an executor and print the responses
//! - `config`: Show, validate or generate the CLI configuration

pub mod commands;
pub mod config;
pub mod output;
pub mod utils;

// Re-exports
pub use config::CliConfig;
pub use output::OutputFormat;
