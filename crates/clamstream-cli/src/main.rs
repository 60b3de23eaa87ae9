use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use clamstream_core::Config;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "clamstream")]
#[command(about = "Stream files to a clamd daemon for virus scanning", long_about = None)]
#[command(version)]
pub struct Cli {
    /// File or directory to scan
    pub path: Option<PathBuf>,

    /// Daemon host (default: localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// Daemon port (default: 3310)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Response timeout in milliseconds, 0 waits forever
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Check whether the daemon is alive
    #[arg(long)]
    pub ping: bool,

    /// Print the daemon version and signature database
    #[arg(long)]
    pub db_version: bool,

    /// Send each file as one chunk straight from its descriptor
    #[arg(long)]
    pub channel: bool,

    /// Scan files concurrently on a worker pool
    #[arg(long = "async")]
    pub concurrent: bool,

    /// Output format: plain, json
    #[arg(short, long, default_value = "plain")]
    pub format: OutputFormat,

    /// Config file (default: .clamstream.toml, then the user config dir)
    #[arg(short, long, env = "CLAMSTREAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One `<path>: <verdict>` line per file (default)
    Plain,
    /// One JSON object per line
    Json,
}

impl Cli {
    /// Config file settings with command line flags applied on top
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => Config::load(),
        };

        if let Some(host) = &self.host {
            config.daemon.host = host.clone();
        }
        if let Some(port) = self.port {
            config.daemon.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.daemon.timeout_ms = timeout;
        }
        if self.channel {
            config.scanner.direct_file_transfer = true;
        }

        Ok(config)
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if std::env::var("CLAMSTREAM_DEBUG").is_ok() {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.resolve_config()?;
    tracing::info!(
        endpoint = %config.endpoint(),
        timeout_ms = config.daemon.timeout_ms,
        "using daemon"
    );

    if cli.ping {
        return Ok(commands::ping::run(&config, cli.format));
    }

    if cli.db_version {
        commands::version::run(&config, cli.format)?;
        return Ok(ExitCode::SUCCESS);
    }

    match &cli.path {
        Some(path) => {
            let summary = if cli.concurrent {
                commands::scan::run_async(&config, path, cli.format)?
            } else {
                commands::scan::run(&config, path, cli.format)?
            };
            Ok(summary.exit_code())
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(ExitCode::SUCCESS)
        }
    }
}
