use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use beacon::client::Client;
use beacon::config::ClientConfig;

#[derive(Parser)]
#[command(
    name = "beacon",
    version,
    about = "Keeps an application registered with Eureka-compatible discovery servers",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file (defaults to BEACON_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an application and keep it alive until terminated
    Run {
        /// Application identifier
        #[arg(short, long)]
        app: String,

        /// Port the application listens on
        #[arg(short, long)]
        port: u16,
    },

    /// Print every application known to the selected discovery server
    Apps,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_format, cli.verbose);

    let config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::from_env().context("Failed to load config from environment")?,
    };

    match cli.command {
        Commands::Run { app, port } => {
            tracing::info!(app = %app, port = %port, "Starting run command");
            run(config, app, port).await?;
        }
        Commands::Apps => {
            tracing::info!("Starting apps command");
            apps(config).await?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the built-in directives
fn init_logging(format: LogFormat, verbose: bool) {
    let directives = if verbose { "beacon=debug,info" } else { "beacon=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let layer = tracing_subscriber::fmt::layer().with_target(verbose);
    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => subscriber.with(layer).init(),
        LogFormat::Json => subscriber
            .with(layer.json().flatten_event(true).with_current_span(false))
            .init(),
    }
}

async fn run(config: ClientConfig, app: String, port: u16) -> Result<()> {
    let client = Client::builder(config)
        .register_self(app, port)
        .build()
        .context("Invalid client configuration")?;

    let handle = client.run().await.context("Failed to start discovery client")?;

    // the shutdown coordinator exits the process after de-registering
    handle.wait().await;
    Ok(())
}

async fn apps(config: ClientConfig) -> Result<()> {
    let client = Client::builder(config.with_register_with_eureka(false))
        .build()
        .context("Invalid client configuration")?;

    let api = client.api().await.context("Failed to pick a discovery server")?;
    let registry = api
        .query_all_instances()
        .await
        .with_context(|| format!("Failed to query all instances from {}", api.base_url()))?;

    println!("{}", serde_json::to_string_pretty(&registry)?);
    Ok(())
}
