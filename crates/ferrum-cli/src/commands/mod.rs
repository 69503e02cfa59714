//! CLI command implementations

pub mod config_cmd;
pub mod run;

// Re-exports
pub use config_cmd::ConfigCommand;
pub use run::RunCommand;
