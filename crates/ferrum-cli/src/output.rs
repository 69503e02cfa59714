//! Output formatting utilities

use colored::*;
use ferrum_types::{FerrumError, Result};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

/// Serialize `data` as pretty JSON
pub fn to_json<T: Serialize>(data: &T) -> Result<String> {
    serde_json::to_string_pretty(data)
        .map_err(|e| FerrumError::serialization(format!("JSON serialization failed: {}", e)))
}

/// Print formatted output
pub fn print_output<T: Serialize>(data: &T) -> Result<()> {
    println!("{}", to_json(data)?);
    Ok(())
}

/// Print error with formatting
pub fn print_error(error: &FerrumError) {
    eprintln!("{} {}", "Error:".red().bold(), error);
}

/// Print warning with formatting
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "Warning:".yellow().bold(), message);
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✅".green(), message.green());
}

/// Print info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ️".blue(), message);
}
