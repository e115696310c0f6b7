//! localserve - Local development web server
//!
//! Entry point for the localserve binary.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use localserve::cli::{self, ConfigCommand};
use localserve::server::Server;

/// localserve - Local development web server with rewrites, proxying and mocks
#[derive(Parser)]
#[command(name = "localserve")]
#[command(version = localserve::VERSION)]
#[command(about = "Local development web server with a middleware pipeline", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "localserve.toml", global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Listen port, overriding the configuration file
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory to serve, overriding the configuration file
    #[arg(short, long)]
    directory: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Start,
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("localserve={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Some(Commands::Config { command }) => cli::handle_config_command(&cli.config, command),
        Some(Commands::Start) | None => start_server(&cli.config, cli.port, cli.directory),
    }
}

fn start_server(config_path: &Path, port: Option<u16>, directory: Option<String>) -> anyhow::Result<()> {
    info!("localserve v{} starting...", localserve::VERSION);

    if config_path.exists() {
        info!("Loading configuration from {:?}", config_path);
    } else {
        info!("Using default configuration");
    }
    let mut config = cli::load_config(config_path)?;

    if let Some(port) = port {
        config.set_port(port)?;
    }
    if let Some(directory) = directory {
        config.server.directory = directory;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let server = Server::new(config)?;
        server.run().await
    })
}
