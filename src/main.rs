use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use beacon::aggregation::Aggregator;
use beacon::api::{self, AppState, Pixel};
use beacon::config::{Config, DatabaseBackend};
use beacon::ingest::IngestPipeline;
use beacon::storage::{self, CachedCounterStore, CounterStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Load the pixel before anything else so a bad asset stops startup early
    let pixel = Pixel::load(config.pixel_path.as_deref()).await?;
    info!(
        "Loaded tracking pixel ({} bytes, {})",
        pixel.bytes.len(),
        pixel.content_type
    );

    // Initialize storage
    match config.database.backend {
        DatabaseBackend::Sqlite => info!("Using SQLite storage: {}", config.database.url),
        DatabaseBackend::Postgres => info!("Using PostgreSQL storage"),
    }
    let mut store = storage::connect(&config.database).await?;

    info!("Initializing database...");
    store.init().await?;
    info!("Database initialized successfully");

    if config.cache.ttl_secs > 0 {
        info!(
            "Read cache enabled (ttl {}s, {} entries)",
            config.cache.ttl_secs, config.cache.max_entries
        );
        store = Arc::new(CachedCounterStore::new(
            store,
            config.cache.max_entries,
            Duration::from_secs(config.cache.ttl_secs),
        ));
    }

    // Start the ingest workers before accepting traffic
    let pipeline = IngestPipeline::start(Arc::clone(&store), &config.tracking);

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        aggregator: Aggregator::new(Arc::clone(&store), config.tracking.store_timeout()),
        queue: pipeline.queue(),
        stats: pipeline.stats(),
        pixel,
        cookie: config.cookie.clone(),
        backfill_secret: config.backfill_secret.clone(),
        home_url: config.home_url.clone(),
    });
    let router = api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Beacon listening on http://{}", addr);
    info!("   - Pixel at http://{}/beacon.png?id=<object>", addr);
    info!("   - Counters at http://{}/api/<object>", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Router state (and its queue handle) is gone; apply what is left.
    pipeline.shutdown().await;

    Ok(())
}
