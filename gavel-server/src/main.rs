//! Gavel cache synchronization server
//!
//! Keeps the auction site's cache and derived views (about-to-close,
//! recent and popular auctions, snapshots) in step with the primary store.

mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::file::CacheBackend;
use config::{ConfigLoader, get_database_url};
use gavel_core::config::ConfigStore;
use gavel_core::events::shutdown_channel;
use gavel_core::processors::{
    ChangeFeedConsumer, EventQueueConsumer, PipelineStats, PopularityRefresher, Reconciler,
    TimerScheduler,
};
use gavel_core::stores::memory::MemoryCacheStore;
use gavel_core::stores::postgres::{PgCacheStore, PgChangeFeed, PgCommandQueue, PgPrimaryStore};
use gavel_core::stores::{CacheStore, CommandQueue, PrimaryStore};
use gavel_core::utils::clock::{Clock, SystemClock};
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Gavel - cache and derived-view synchronization for the auction backend
#[derive(Parser, Debug)]
#[command(name = "gavel-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./gavel.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "GAVEL_LOG_JSON", default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Starting gavel-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

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

    let call_timeout = loaded_config.pipeline.call_timeout;
    let pipeline_config = ConfigStore::new(loaded_config.pipeline.clone());
    let stats = Arc::new(PipelineStats::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let primary: Arc<dyn PrimaryStore> =
        Arc::new(PgPrimaryStore::new(db_pool.clone(), call_timeout));
    let cache: Arc<dyn CacheStore> = match loaded_config.cache_backend {
        CacheBackend::Postgres => Arc::new(PgCacheStore::new(db_pool.clone(), call_timeout)),
        CacheBackend::Memory => {
            tracing::warn!("Using the in-process cache; views are not shared across instances");
            Arc::new(MemoryCacheStore::new())
        }
    };
    let queue: Arc<dyn CommandQueue> = Arc::new(PgCommandQueue::new(
        db_pool.clone(),
        loaded_config.queue.clone(),
        call_timeout,
    ));
    let feed = PgChangeFeed::new(db_pool.clone(), loaded_config.feed.clone(), call_timeout);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let change_feed_consumer = ChangeFeedConsumer::new(
        cache.clone(),
        pipeline_config.clone(),
        clock.clone(),
        stats.clone(),
    );
    let event_queue_consumer = EventQueueConsumer::new(
        primary.clone(),
        cache.clone(),
        queue.clone(),
        pipeline_config.clone(),
        clock.clone(),
        stats.clone(),
    );
    let reconciler = Reconciler::new(
        primary,
        cache.clone(),
        queue,
        pipeline_config.clone(),
        clock.clone(),
        stats.clone(),
    );
    let popularity =
        PopularityRefresher::new(cache.clone(), pipeline_config.clone(), clock, stats.clone());
    let scheduler = TimerScheduler::new(reconciler, popularity, cache, pipeline_config.clone());

    let workers = vec![
        tokio::spawn(change_feed_consumer.run(feed, shutdown_rx.clone())),
        tokio::spawn(event_queue_consumer.run(shutdown_rx.clone())),
        tokio::spawn(scheduler.run(shutdown_rx)),
    ];

    let listen_addr = loaded_config.listen;
    let reload_notify =
        spawn_config_reload_handler(config_loader, loaded_config, pipeline_config.clone());

    let router = build_router(AppState::new(stats, pipeline_config));
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr).await;

    // The HTTP server only returns on a shutdown signal or a bind failure;
    // either way the consumers stop after finishing their current item.
    reload_notify.notify_one();
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("Every consumer already exited");
    }
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!("Consumer task failed: {}", e);
        }
    }

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
