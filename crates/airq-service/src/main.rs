//! airq-service - air quality ingestion service and HTTP API.
//!
//! Run with: `cargo run -p airq-service`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use airq_service::{AppState, Config, FlushScheduler, Ingestor, Overrides, api, config};

/// airq-service - ingestion service and HTTP REST API for air quality sensors.
#[derive(Parser, Debug)]
#[command(name = "airq-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, env = "AIRQ_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service in the foreground (default behavior).
    Run,

    /// Print the effective configuration as TOML.
    ShowConfig,

    /// Write the effective configuration to the config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply(&args.overrides);

    match args.command {
        Some(Command::ShowConfig) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::InitConfig { force }) => {
            let path = args.config.unwrap_or_else(config::default_config_path);
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config.validate()?;
            config.save(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Some(Command::Run) | None => run_server(config).await,
    }
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("airq_service=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    config.validate()?;

    match &config.storage.database {
        Some(path) => info!("Opening SQLite database at {:?}", path),
        None => info!("Appending to CSV file at {:?}", config.storage.csv_path),
    }
    let store = config
        .storage
        .open()
        .context("Failed to open record store")?;

    let ingestor = Arc::new(Ingestor::new(
        store,
        config.thresholds.clone(),
        config.retention,
        &config.buffer,
    ));

    // Only staging backends have anything to flush
    let scheduler = ingestor.kind().stages_writes().then(|| {
        FlushScheduler::start(Arc::clone(&ingestor), config.buffer.flush_interval())
    });

    let state = AppState::new(Arc::clone(&ingestor), config.clone());

    let app = api::router()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("Starting server on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    match ingestor.shutdown().await {
        Ok(_) => info!("Shutdown complete"),
        Err(e) => {
            let pending = ingestor.pending_len().await;
            error!("Final flush failed, {} records were not persisted: {}", pending, e);
            return Err(e.into());
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
