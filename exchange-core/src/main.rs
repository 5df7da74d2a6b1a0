use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::signal;
use tracing::{error, info, warn};

use exchange_common::logging::{init_logging, LogConfig};
use exchange_core::config::Settings;
use exchange_core::service::ExchangeService;
use exchange_core::store::PgStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_logging(LogConfig::from_env())?;

    info!("🚀 Starting exchange matching engine");

    let settings = Settings::new()?;
    info!(
        "Configuration loaded (database: {} connections, tick interval: {}s)",
        settings.database.max_connections, settings.engine.tick_interval_secs
    );

    info!("🔌 Connecting to database...");
    let pool = create_database_pool(&settings).await?;
    test_database_connection(&pool).await?;
    info!("✅ Database connection established");

    let store = Arc::new(PgStore::new(pool));
    store.init_schema().await?;

    let service = ExchangeService::new(store, settings.engine.matching_enabled);

    // Boot sequence: refill empty top tiers, then one matching pass
    if let Err(err) = service.startup().await {
        warn!("Startup sequence reported an error: {}", err);
    }

    info!("📊 Matching platform ready");
    info!("🛡️ Circuit breaker system active");
    info!("📋 Buyer order history and match assignment tracking enabled");

    // Background loop: daily breaker rollover, re-evaluation and a match
    // trigger in case orders arrived while the engine was disabled
    let tick = Duration::from_secs(settings.engine.tick_interval_secs);
    let background = Arc::clone(&service);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            if let Err(err) = background.run_breaker_maintenance().await {
                warn!("Breaker maintenance failed: {}", err);
            }
            if let Err(err) = background.trigger_matching().await {
                error!("Scheduled matching failed: {}", err);
            }
        }
    });

    signal::ctrl_c().await?;
    info!("Received Ctrl+C signal, shutting down");
    Ok(())
}

/// Create database connection pool
async fn create_database_pool(settings: &Settings) -> Result<PgPool, Box<dyn std::error::Error + Send + Sync>> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .min_connections(settings.database.min_connections)
        .max_lifetime(Duration::from_secs(settings.database.max_lifetime))
        .acquire_timeout(Duration::from_secs(30))
        .connect(&settings.database.url)
        .await?;

    Ok(pool)
}

/// Test database connection
async fn test_database_connection(pool: &PgPool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
