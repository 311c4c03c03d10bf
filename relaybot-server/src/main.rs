mod config;
mod server;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use server::run_server;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "relaybot")]
#[command(about = "Peer-to-peer fleet migrating objects between storage backends")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a bot
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,

        /// Log level, overrides `log_level` from the config file
        #[arg(long)]
        log_level: Option<String>,
    },
}

/// `RUST_LOG` wins, then the flag, then the config file.
fn init_tracing(level: Option<&str>) {
    let level = level.unwrap_or("info");
    let default_filter = format!("relaybot={level},relaybot_core={level},tower_http={level}");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config_path: &str, log_level: Option<String>) -> anyhow::Result<()> {
    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(log_level.as_deref());
            return Err(e).with_context(|| format!("failed to load config from {}", config_path));
        }
    };

    init_tracing(log_level.as_deref().or(config.log_level.as_deref()));
    tracing::info!("Starting relaybot {} with config: {}", config.name, config_path);

    run_server(config).await.context("server error")
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config, log_level } => {
            if let Err(e) = run(&config, log_level).await {
                tracing::error!("{:#}", e);
                std::process::exit(1);
            }
        }
    }
}
