//! Tether CLI
//!
//! Command-line interface over the durable sync queue: inspect pending
//! events, drop them, or flush them to the server.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tether_core::SyncConfig;

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Tether - inspect and flush the offline sync queue")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or edit the durable queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Send every queued event and wait for the queue to drain
    Flush {
        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
        /// Session token (defaults to $TETHER_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },
    /// Show configuration summary and pending events
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List pending events
    #[command(alias = "ls")]
    List,
    /// Delete one pending event
    #[command(alias = "rm")]
    Drop {
        /// Event ID
        id: String,
    },
    /// Delete every pending event
    Clear {
        /// Don't ask for confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (base_url, realtime_url, data_dir, max_retries, ...)
        key: String,
        /// Configuration value
        value: String,
    },
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work even when the file doesn't parse
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        SyncConfig::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Queue { command } => handle_queue_command(command, &config, &output).await,
        Commands::Flush { timeout, token } => {
            let token = token.or_else(|| std::env::var("TETHER_TOKEN").ok());
            commands::flush::flush(&config, timeout, token, &output).await
        }
        Commands::Status => commands::status::show(&config, config_path, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

async fn handle_queue_command(
    command: QueueCommands,
    config: &SyncConfig,
    output: &Output,
) -> Result<()> {
    match command {
        QueueCommands::List => commands::queue::list(config, output),
        QueueCommands::Drop { id } => commands::queue::drop(config, id, output).await,
        QueueCommands::Clear { force } => commands::queue::clear(config, force, output),
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
        Some(ConfigCommands::Path) => commands::config::path(config_path, output),
    }
}

/// Install the tracing subscriber
///
/// `RUST_LOG` wins when set. Logs go to `log_file` when configured, stderr
/// otherwise.
fn init_logging(config: &SyncConfig, verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("tether_core={},tether_cli={}", level, level))
    });

    if let Some(ref path) = config.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(file)
                    .try_init();
                return;
            }
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", path, e);
            }
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
