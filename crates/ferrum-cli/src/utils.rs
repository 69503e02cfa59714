//! CLI utility functions

use ferrum_types::{FerrumError, Result, TokenId};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup logging based on verbosity level
///
/// `RUST_LOG` wins over the flags unless `--verbose` is given.
pub fn setup_logging(verbose: bool, quiet: bool, json: bool) -> Result<()> {
    let log_level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    let filter = if verbose {
        EnvFilter::new(log_level.to_string())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()))
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .try_init()
    };

    result.map_err(|e| FerrumError::internal(format!("Failed to install logger: {}", e)))
}

/// Parse a prompt given as comma or whitespace separated token ids
pub fn parse_token_list(input: &str) -> Result<Vec<TokenId>> {
    let tokens = input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .map(TokenId)
                .map_err(|_| FerrumError::invalid_request(format!("Invalid token id: {:?}", part)))
        })
        .collect::<Result<Vec<_>>>()?;

    if tokens.is_empty() {
        return Err(FerrumError::invalid_request("Prompt has no tokens"));
    }
    Ok(tokens)
}

/// Format a token list the way `parse_token_list` reads it
pub fn format_token_list(tokens: &[TokenId]) -> String {
    tokens
        .iter()
        .map(|t| t.0.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
