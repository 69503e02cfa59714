//! Ferrum executor CLI
//!
//! Drives an in-process executor from the command line.

use clap::{Parser, Subcommand};
use ferrum_cli::{
    commands::*,
    config::{CliConfig, DEFAULT_CONFIG_FILE},
    output::{print_error, OutputFormat},
    utils::setup_logging,
};
use std::process;

#[derive(Parser)]
#[command(name = "ferrum-exec")]
#[command(about = "Ferrum executor CLI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    long_about = "Submit requests to an in-process Ferrum executor and inspect its configuration"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    format: OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run prompts through an executor
    Run(RunCommand),

    /// Show, validate or generate configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(cli.verbose, cli.quiet, cli.log_json) {
        print_error(&e);
        process::exit(1);
    }

    // `config --generate` must work even when the current file is broken
    let config = match &cli.command {
        Commands::Config(cmd) if cmd.generate => CliConfig::default(),
        _ => match CliConfig::load(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                print_error(&e);
                process::exit(1);
            }
        },
    };

    let result = match cli.command {
        Commands::Run(cmd) => run::execute(cmd, config, cli.format).await,
        Commands::Config(cmd) => config_cmd::execute(cmd, config, &cli.config, cli.format),
    };

    if let Err(e) = result {
        print_error(&e);
        process::exit(1);
    }
}
