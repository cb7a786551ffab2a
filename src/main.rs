//! shortlink-core - identifier allocation and serving core
//!
//! Process entry point: wires a Postgres pool and a Redis connection manager into a
//! [`ShortenerService`], applies the schema, and runs the pool refill scheduler and the
//! age-based cleaner as background tasks until shutdown is requested.
//!
//! This binary has no HTTP (or other transport) surface of its own -- per the scope
//! notes in `SPEC_FULL.md` §1, request handling belongs to an embedder. It exists so the
//! core can be exercised end-to-end against real Postgres/Redis instances.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;

use shortlink_core::cache::RedisUrlCache;
use shortlink_core::cleaner::ShutdownSignal;
use shortlink_core::config::ServiceConfig;
use shortlink_core::lock;
use shortlink_core::metrics::{MetricsSink, TracingMetricsSink};
use shortlink_core::pool::RedisHashPool;
use shortlink_core::ratelimit::RedisRateLimiter;
use shortlink_core::store::{PgHashStore, PgUrlStore};
use shortlink_core::{ServiceDeps, ShortenerService};

const CLEANER_LOCK_RESOURCE: &str = "cleanOldUrls";

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .json()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!(
        name = shortlink_core::NAME,
        version = shortlink_core::VERSION,
        "starting shortlink-core"
    );

    let config = ServiceConfig::from_env()?;

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let redis_url = std::env::var("REDIS_URL").map_err(|_| anyhow::anyhow!("REDIS_URL must be set"))?;

    let pg_pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await?;

    let redis_client = redis::Client::open(redis_url)?;
    let redis_conn = ConnectionManager::new(redis_client).await?;

    let hash_store = Arc::new(PgHashStore::new(pg_pool.clone()));
    hash_store.migrate().await?;
    let url_store = Arc::new(PgUrlStore::new(pg_pool));

    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetricsSink);

    let cache = Arc::new(RedisUrlCache::with_metrics(redis_conn.clone(), metrics.clone()));
    let hash_pool = Arc::new(RedisHashPool::new(redis_conn.clone(), config.pool.pool_key.clone()));
    let rate_limiter = Arc::new(RedisRateLimiter::new(redis_conn.clone(), config.rate_limit.clone()));

    let deps = ServiceDeps {
        hash_store,
        url_store,
        pool: hash_pool,
        cache,
        rate_limiter,
        raw_validator: Arc::new(shortlink_core::validation::RawUrlValidator::new(
            config.url_validation.clone(),
        )),
        normalized_validator: Arc::new(shortlink_core::validation::PrivateHostValidator),
        redirect_validator: Arc::new(shortlink_core::validation::PrivateHostValidator),
        metrics,
    };

    let service = Arc::new(ShortenerService::new(deps, config.clone())?);

    let scheduler_handle = service.spawn_scheduler(redis_conn.clone());

    let shutdown = ShutdownSignal::new();
    let cleaner_handle = tokio::spawn(run_cleaner_forever(
        service.clone(),
        redis_conn,
        config.clone(),
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    shutdown.request();
    scheduler_handle.abort();
    let _ = cleaner_handle.await;

    tracing::info!("shortlink-core shutdown complete");
    Ok(())
}

/// Drives the cleaner on its own cron schedule under the `cleanOldUrls` lock, mirroring
/// how [`shortlink_core::scheduler::PoolRefillScheduler`] drives the pool refill.
async fn run_cleaner_forever(
    service: Arc<ShortenerService>,
    redis: ConnectionManager,
    config: ServiceConfig,
    shutdown: ShutdownSignal,
) {
    let schedule = match Schedule::from_str(&config.cleaner.cron_expression) {
        Ok(schedule) => schedule,
        Err(err) => {
            tracing::error!(error = %err, "invalid cleaner cron expression; cleaner will not run");
            return;
        }
    };

    loop {
        if shutdown.is_set() {
            return;
        }

        let Some(next) = schedule.upcoming(Utc).next() else {
            tracing::error!("cleaner cron expression has no future occurrences; stopping");
            return;
        };
        let delay = (next - Utc::now()).to_std().unwrap_or(Duration::from_secs(1));
        tokio::time::sleep(delay).await;

        if shutdown.is_set() {
            return;
        }

        let cleaner = service.build_cleaner(shutdown.clone());
        let result = lock::with_lock(
            redis.clone(),
            CLEANER_LOCK_RESOURCE,
            config.cleaner.lock_at_least_for,
            config.cleaner.lock_at_most_for,
            || async { cleaner.run().await },
        )
        .await;

        match result {
            Ok(Some(())) => {}
            Ok(None) => tracing::debug!("cleaner tick skipped: cleanOldUrls lock is held elsewhere"),
            Err(err) => tracing::error!(error = %err, "cleaner run failed"),
        }
    }
}
