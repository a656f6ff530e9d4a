//! PvP Match Engine Server
//!
//! A headless worker that follows a PvP betting program on the ledger,
//! reconciles match state into Postgres and drives refunds and resolves.

mod config;
mod shutdown;

use clap::Parser;
use config::{get_database_url, load_config};
use pvp_core::events::{BroadcastSink, NotificationSink, log_batch_channel};
use pvp_core::ledger::{
    HttpTxGateway, LedgerLogClient, LedgerLogClientConfig, RandomnessClient, RefundSender,
    ResolveSender,
};
use pvp_core::pool::RandomnessPool;
use pvp_core::processors::{
    GameTimeoutSweeper, PoolMaintenance, Reconciler, RefundDriver, ResolveDriver, Resolver,
};
use pvp_core::scheduler::RefundScheduler;
use pvp_core::store::{PgStore, Store};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Capacity of the match notification broadcast channel.
const NOTIFICATION_BUFFER: usize = 256;

/// PvP match lifecycle engine
#[derive(Parser, Debug)]
#[command(name = "pvp-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./pvp-config.toml")]
    config: PathBuf,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting pvp-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let file_config = load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Get database URL from environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    // Run migrations if requested
    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    // Shared collaborators
    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool.clone()));
    let gateway = Arc::new(HttpTxGateway::new(
        file_config.signer.base_url.clone(),
        Duration::from_secs(file_config.signer.timeout_secs),
    ));
    let refund_sender: Arc<dyn RefundSender> = gateway.clone();
    let resolve_sender: Arc<dyn ResolveSender> = gateway.clone();
    let randomness: Arc<dyn RandomnessClient> = gateway;

    let notifier: Arc<dyn NotificationSink> = Arc::new(BroadcastSink::new(NOTIFICATION_BUFFER));
    let pool = Arc::new(RandomnessPool::new(
        store.clone(),
        randomness.clone(),
        file_config.pool.max_size,
    ));
    let resolver = Arc::new(Resolver::new(
        store.clone(),
        resolve_sender,
        randomness,
        pool.clone(),
        file_config.pool.cooldown_minutes,
    ));
    let scheduler = RefundScheduler::new(store.clone());

    let (batch_tx, batch_rx) = log_batch_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn the engine loops
    let log_client = LedgerLogClient::new(LedgerLogClientConfig {
        ws_url: file_config.ledger.ws_url.clone(),
        program_id: file_config.ledger.program_id.clone(),
        commitment: file_config.ledger.commitment.clone(),
    });
    let reconciler = Reconciler::new(
        store.clone(),
        scheduler.clone(),
        resolver.clone(),
        notifier.clone(),
        batch_rx,
        shutdown_rx.clone(),
    );
    let resolve_driver = ResolveDriver::new(store.clone(), resolver, shutdown_rx.clone());
    let refund_driver = RefundDriver::new(
        store.clone(),
        scheduler,
        refund_sender,
        shutdown_rx.clone(),
    );
    let sweeper = GameTimeoutSweeper::new(store.clone(), notifier, shutdown_rx.clone());
    let maintenance = PoolMaintenance::new(pool, file_config.pool.initial_size, shutdown_rx.clone());

    let handles = vec![
        tokio::spawn(log_client.run(batch_tx, shutdown_rx.clone())),
        tokio::spawn(reconciler.run()),
        tokio::spawn(resolve_driver.run()),
        tokio::spawn(refund_driver.run()),
        tokio::spawn(sweeper.run()),
        tokio::spawn(maintenance.run()),
    ];
    tracing::info!("Engine loops started");

    // Wait for shutdown signal
    shutdown::shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    // Wait for all loops to drain
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Engine loop panicked: {}", e);
        }
    }

    // Close database connections gracefully
    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
