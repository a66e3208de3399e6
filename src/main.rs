//! shipment-sync - Rate-limit-aware incremental shipment synchronization
//!
//! This is the main entry point for the shipment-sync application.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use shipment_sync::auth::{StoredTokenProvider, TokenRefresher};
use shipment_sync::config::Config;
use shipment_sync::database::{Database, SqliteDatabase};
use shipment_sync::models::{EndpointKind, NewAccount};
use shipment_sync::otel::{init_tracing, OtelProvider, SyncMetrics};
use shipment_sync::sync::{
    ChannelJobQueue, HttpFetcher, RetryManager, SyncContext, SyncEngine, SyncScheduler,
};

/// shipment-sync - Rate-limit-aware incremental shipment synchronization
#[derive(Parser, Debug)]
#[command(name = "shipment-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "SHIPMENT_SYNC_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync scheduler until Ctrl+C or SIGTERM (default)
    Run,

    /// Register an account and create its endpoint trackers
    AddAccount {
        /// Display name of the account
        #[arg(long)]
        name: String,

        /// OAuth client id
        #[arg(long, env = "SHIPMENT_SYNC_CLIENT_ID")]
        client_id: String,

        /// OAuth client secret
        #[arg(long, env = "SHIPMENT_SYNC_CLIENT_SECRET", hide_env_values = true)]
        client_secret: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let otel_provider = OtelProvider::new(&config.otel)?;
    init_tracing(
        &otel_provider,
        &config.logging.level,
        &config.logging.format,
    )?;

    let database = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, database, &otel_provider).await,
        Command::AddAccount {
            name,
            client_id,
            client_secret,
        } => add_account(database, NewAccount::new(name, client_id, client_secret)).await,
    };

    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    result
}

/// Start the scheduler and block until shutdown
async fn run(
    config: Config,
    database: Arc<SqliteDatabase>,
    otel_provider: &OtelProvider,
) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting shipment-sync"
    );

    let fetcher = Arc::new(HttpFetcher::new(config.http.clone())?);
    let tokens = Arc::new(StoredTokenProvider::new(database.clone()));
    let (queue, job_rx) = ChannelJobQueue::new();

    let ctx = SyncContext::new(
        database.clone(),
        fetcher,
        tokens,
        Arc::new(queue),
        config.upstream.clone(),
    );
    let engine = Arc::new(SyncEngine::new(ctx, &config.http, &config.scheduler));

    let refresher = Arc::new(TokenRefresher::new(
        database.clone(),
        config.upstream.token_url.clone(),
        RetryManager::new(config.retry.clone()),
        Duration::from_secs(config.http.timeout_secs),
    )?);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut scheduler = SyncScheduler::new(config.scheduler.clone(), engine, job_rx, shutdown_rx)
        .with_refresher(refresher);
    if otel_provider.is_enabled() {
        scheduler = scheduler.with_metrics(Arc::new(SyncMetrics::new(&otel_provider.meter())));
    }

    info!(
        categories = ?config.upstream.categories,
        workers = config.scheduler.workers,
        tick_interval_secs = config.scheduler.tick_interval_secs,
        "Sync scheduler configured"
    );

    let scheduler_task = tokio::spawn(scheduler.run());

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Sync scheduler task panicked");
    }

    info!("shipment-sync shutdown complete");
    Ok(())
}

/// Register an account with both endpoint trackers
async fn add_account(database: Arc<SqliteDatabase>, account: NewAccount) -> anyhow::Result<()> {
    let account_id = database.create_account(&account).await?;
    let now = chrono::Utc::now();

    for endpoint in EndpointKind::ALL {
        let tracker = database.ensure_tracker(account_id, endpoint, now).await?;
        info!(
            account_id = account_id,
            tracker_id = tracker.id,
            endpoint = %endpoint,
            "Endpoint tracker ready"
        );
    }

    info!(account_id = account_id, name = %account.name, "Account registered");
    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
