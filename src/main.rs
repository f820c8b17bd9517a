//! Octowatch
//!
//! Polls live smart meter telemetry from Octopus Energy and streams it to
//! websocket viewers.
//!
//! # Configuration
//!
//! Environment variables:
//! - `OCTOPUS_API_KEY`: Octopus API key (required to serve)
//! - `OCTOPUS_ACCOUNT_NUMBER`: Account with the smart meter (required to serve)
//! - `OCTOWATCH_*`: Overrides for the config file, see `octowatch config`
//! - `RUST_LOG`: Log filter (default: `octowatch=<logging.level>`)

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use octowatch::api::{self, AppState};
use octowatch::broadcast::Broadcaster;
use octowatch::config::{generate_default_config, Config, LoggingConfig};
use octowatch::octopus::{ConsumptionReading, GraphQlClient, OctopusClient};
use octowatch::poller::{Poller, PollerConfig};
use octowatch::store::ReadingStore;

#[derive(Parser)]
#[command(name = "octowatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Live Octopus Energy smart meter feed")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: search the usual locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the meter and serve the live feed (default)
    Serve,

    /// Print stored readings
    Readings {
        /// Newest N readings
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print a default config file
    Config {
        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Serve);
    if let Commands::Config { output } = &command {
        return write_default_config(output.as_deref());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    init_tracing(&config.logging);

    match command {
        Commands::Serve => run_serve(config).await,
        Commands::Readings { limit, json } => print_readings(&config, limit, json),
        Commands::Config { .. } => Ok(()),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("octowatch={},tower_http=info", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Octowatch v{}", env!("CARGO_PKG_VERSION"));

    let hub = Arc::new(Broadcaster::<ConsumptionReading>::new());
    let hub_handle = hub.start()?;

    let store = if config.storage.enabled {
        let store = ReadingStore::open(&config.storage.db_path)
            .with_context(|| format!("Failed to open reading store {}", config.storage.db_path))?;
        tracing::info!("Reading store: {}", config.storage.db_path);
        Some(Arc::new(store))
    } else {
        tracing::info!("Reading store disabled");
        None
    };

    let graphql = GraphQlClient::new(&config.octopus.base_url, config.octopus.request_timeout_ms)?;
    let client = OctopusClient::new(
        graphql,
        config.octopus.api_key.clone(),
        config.octopus.account_number.clone(),
    );

    let mut poller = Poller::new(
        client,
        Arc::clone(&hub),
        PollerConfig {
            interval: config.poller.interval(),
        },
    );
    if let Some(store) = &store {
        poller = poller.with_store(Arc::clone(store));
    }

    let mut state =
        AppState::new(Arc::clone(&hub), config.api.clone()).with_poll_status(poller.status());
    if let Some(store) = store {
        state = state.with_store(store);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut poller_task = poller.start(shutdown_rx.clone());

    let mut server_rx = shutdown_rx;
    let api_config = config.api.clone();
    let mut server_task = tokio::spawn(async move {
        let stop = async move {
            let _ = server_rx.wait_for(|stop| *stop).await;
        };
        api::serve(state, &api_config, stop).await
    });

    let mut poller_result = None;
    let mut server_result = None;

    tokio::select! {
        _ = api::shutdown_signal() => {}
        result = &mut poller_task => poller_result = Some(result),
        result = &mut server_task => server_result = Some(result),
    }

    shutdown_tx.send_replace(true);

    let poller_result = match poller_result {
        Some(result) => result,
        None => poller_task.await,
    };
    let server_result = match server_result {
        Some(result) => result,
        None => server_task.await,
    };

    hub.stop();
    hub_handle.await.context("Broadcast hub task panicked")?;

    server_result.context("API server task panicked")??;
    poller_result.context("Poller task panicked")??;

    tracing::info!("Octowatch stopped");
    Ok(())
}

fn print_readings(config: &Config, limit: usize, json: bool) -> anyhow::Result<()> {
    let store = ReadingStore::open(&config.storage.db_path)
        .with_context(|| format!("Failed to open reading store {}", config.storage.db_path))?;
    let readings = store.readings(None, Some(limit))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&readings)?);
        return Ok(());
    }

    if readings.is_empty() {
        println!("No readings stored in {}", config.storage.db_path);
        return Ok(());
    }

    println!("{:<22} {:>14} {:>10}", "READ AT", "TOTAL (Wh)", "DEMAND (W)");
    for reading in &readings {
        println!(
            "{:<22} {:>14} {:>10}",
            reading.timestamp.format("%Y-%m-%d %H:%M:%S"),
            reading.total_consumption,
            reading.demand
        );
    }

    Ok(())
}

fn write_default_config(output: Option<&std::path::Path>) -> anyhow::Result<()> {
    let content = generate_default_config();

    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default config to {}", path.display());
        }
        None => print!("{}", content),
    }

    Ok(())
}
