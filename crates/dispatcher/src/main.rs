use std::sync::Arc;
use std::time::Duration;

use noticat_common::config::AppConfig;
use noticat_common::{db, redis_pool};
use noticat_dispatcher::{build_executor, dispatch_limits, init_tracing};
use noticat_engine::clock::IntervalTicker;
use noticat_engine::lock::RedisRunLock;
use noticat_engine::scheduler::DispatchScheduler;
use noticat_engine::store::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("noticat_dispatcher=info,noticat_engine=info");

    tracing::info!("NotiCat dispatcher starting...");

    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::debug!(config = ?config, "Configuration loaded");

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let store = Arc::new(PgStore::new(pool));
    let executor = Arc::new(build_executor(&config, store.clone()));

    let mut scheduler = DispatchScheduler::new(store, executor, dispatch_limits(&config))
        .with_utc_offset_hours(config.utc_offset_hours);

    if let Some(redis_url) = &config.redis_url {
        let redis = redis_pool::create_redis_pool(redis_url).await?;
        scheduler = scheduler.with_run_lock(Arc::new(RedisRunLock::new(redis)));
        tracing::info!("Cross-process task run lock enabled");
    }

    if once {
        let report = scheduler.dispatch_all().await;
        tracing::info!(report = ?report, "Single dispatch cycle finished");
        return Ok(());
    }

    let ticker = IntervalTicker::new(
        Duration::from_secs(config.dispatch_interval_secs),
        config.run_on_start,
    );
    tracing::info!(
        interval_secs = config.dispatch_interval_secs,
        max_concurrent = config.dispatch_max_concurrent,
        "Starting dispatch scheduler"
    );

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        cycles = scheduler.run(ticker) => {
            tracing::warn!(cycles, "Dispatch scheduler stopped unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("NotiCat dispatcher stopped.");
    Ok(())
}
