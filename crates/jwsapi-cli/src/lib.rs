//! jwsapi command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};

/// jwsapi - Janus gateway WebSocket client
#[derive(Parser, Debug)]
#[command(name = "jwsapi")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to config file
    #[arg(short, long, env = "JWSAPI_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    /// Gateway URL, overriding the configured one
    #[arg(short, long, env = "JWSAPI_URL")]
    pub url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter used when RUST_LOG is not set.
    pub fn default_log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "jwsapi=info",
            1 => "jwsapi=debug",
            _ => "jwsapi=trace",
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the gateway's server info
    Info(commands::info::InfoArgs),

    /// Create a session, attach a plugin and print what the gateway sends
    Probe(commands::probe::ProbeArgs),

    /// Configuration management
    Config(commands::config::ConfigArgs),

    /// Show version information
    Version,
}

/// Run the CLI with the given arguments.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Info(args) => {
            let config = commands::resolve_config(cli.config.as_deref(), cli.url.as_deref())?;
            commands::info::run(config, args).await
        }
        Commands::Probe(args) => {
            let config = commands::resolve_config(cli.config.as_deref(), cli.url.as_deref())?;
            commands::probe::run(config, args).await
        }
        Commands::Config(args) => commands::config::run(args, cli.config.as_deref()).await,
        Commands::Version => {
            println!("jwsapi {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
