//! Service facade (C19): wires every component together behind the caller surface of
//! §6. This is the one type an embedder's transport layer (HTTP handlers, CLI, etc. --
//! all out of scope per §1) depends on.

use std::sync::Arc;

use crate::cache::UrlCache;
use crate::cleaner::{Cleaner, ShutdownSignal};
use crate::config::ServiceConfig;
use crate::error::CoreResult;
use crate::generator::GeneratorWorkerPool;
use crate::metrics::{MetricsSink, SharedMetrics, TracingMetricsSink};
use crate::pipeline::CreationPipeline;
use crate::pool::HashPool;
use crate::ratelimit::{Principal, RateLimiter};
use crate::resolve::{Resolution, ResolutionPipeline};
use crate::scheduler::PoolRefillScheduler;
use crate::store::{HashStore, UrlStore};
use crate::validation::ValidationHook;

/// Every injectable backend a [`ShortenerService`] is built from. Trait objects so
/// tests substitute [`crate::testing`]'s in-memory fakes for the real Postgres/Redis
/// implementations.
pub struct ServiceDeps {
    pub hash_store: Arc<dyn HashStore>,
    pub url_store: Arc<dyn UrlStore>,
    pub pool: Arc<dyn HashPool>,
    pub cache: Arc<dyn UrlCache>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub raw_validator: Arc<dyn ValidationHook>,
    pub normalized_validator: Arc<dyn ValidationHook>,
    pub redirect_validator: Arc<dyn ValidationHook>,
    pub metrics: SharedMetrics,
}

impl ServiceDeps {
    /// Convenience constructor defaulting the metrics sink to [`TracingMetricsSink`]
    /// when the embedder has not wired a real backend.
    pub fn with_default_metrics(
        hash_store: Arc<dyn HashStore>,
        url_store: Arc<dyn UrlStore>,
        pool: Arc<dyn HashPool>,
        cache: Arc<dyn UrlCache>,
        rate_limiter: Arc<dyn RateLimiter>,
        raw_validator: Arc<dyn ValidationHook>,
        normalized_validator: Arc<dyn ValidationHook>,
        redirect_validator: Arc<dyn ValidationHook>,
    ) -> Self {
        Self {
            hash_store,
            url_store,
            pool,
            cache,
            rate_limiter,
            raw_validator,
            normalized_validator,
            redirect_validator,
            metrics: Arc::new(TracingMetricsSink),
        }
    }
}

/// The identifier allocation and serving core, assembled from [`ServiceDeps`] and a
/// [`ServiceConfig`]. Exposes exactly the caller surface of §6: `create_short`,
/// `resolve`, `return_hash`.
pub struct ShortenerService {
    creation: CreationPipeline,
    resolution: ResolutionPipeline,
    rate_limiter: Arc<dyn RateLimiter>,
    pool: Arc<dyn HashPool>,
    cache: Arc<dyn UrlCache>,
    hash_store: Arc<dyn HashStore>,
    url_store: Arc<dyn UrlStore>,
    generator: Arc<GeneratorWorkerPool>,
    config: ServiceConfig,
    metrics: SharedMetrics,
}

impl ShortenerService {
    /// Validates `config`, then wires every pipeline from `deps`.
    pub fn new(deps: ServiceDeps, config: ServiceConfig) -> CoreResult<Self> {
        config.validate()?;

        let generator = Arc::new(GeneratorWorkerPool::new(
            deps.hash_store.clone(),
            config.generator.clone(),
            deps.metrics.clone(),
        ));

        let creation = CreationPipeline::new(
            deps.raw_validator,
            deps.normalized_validator,
            deps.cache.clone(),
            deps.url_store.clone(),
            deps.hash_store.clone(),
            deps.pool.clone(),
            config.clone(),
            deps.metrics.clone(),
        );
        let resolution = ResolutionPipeline::new(
            deps.cache.clone(),
            deps.url_store.clone(),
            deps.redirect_validator,
            config.clone(),
            deps.metrics.clone(),
        );

        Ok(Self {
            creation,
            resolution,
            rate_limiter: deps.rate_limiter,
            pool: deps.pool,
            cache: deps.cache,
            hash_store: deps.hash_store,
            url_store: deps.url_store,
            generator,
            config,
            metrics: deps.metrics,
        })
    }

    /// Creates a short URL for `raw_url` on behalf of `principal`, gated by the rate
    /// limiter. Per §2's control flow, the rate-limit decision always precedes any
    /// durable I/O.
    pub async fn create_short(&self, raw_url: &str, principal: Principal) -> CoreResult<String> {
        if let Err(err) = self.rate_limiter.check(&principal).await {
            self.metrics.counter("rate.limit.exceeded", &[]);
            return Err(err);
        }
        self.creation.create_short(raw_url).await
    }

    /// Resolves `hash` to its original URL, gated by the rate limiter the same way as
    /// creation.
    pub async fn resolve(&self, hash: &str, principal: Principal) -> CoreResult<Resolution> {
        if let Err(err) = self.rate_limiter.check(&principal).await {
            self.metrics.counter("rate.limit.exceeded", &[]);
            return Err(err);
        }
        self.resolution.resolve(hash).await
    }

    /// Explicit release path: returns a previously claimed hash to the pool without
    /// going through the creation pipeline's conflict branch. Also invalidates any
    /// stale cache entry for it.
    pub async fn return_hash(&self, hash: &str) -> CoreResult<()> {
        self.pool.push_back(hash).await?;
        self.cache.delete(hash).await;
        Ok(())
    }

    /// Spawns the pool refill scheduler (C7) as its own `tokio` task, running the
    /// startup warm-up and then the steady-state cron loop forever.
    pub fn spawn_scheduler(&self, redis: redis::aio::ConnectionManager) -> tokio::task::JoinHandle<()> {
        let scheduler = PoolRefillScheduler::new(
            redis,
            self.hash_store.clone(),
            self.pool.clone(),
            self.generator.clone(),
            self.config.scheduler.clone(),
            self.config.pool.max_size,
            self.metrics.clone(),
        );
        tokio::spawn(async move {
            if let Err(err) = scheduler.run_forever().await {
                tracing::error!(error = %err, "pool refill scheduler exited with an error");
            }
        })
    }

    /// Builds a [`Cleaner`] (C12) sharing this service's store dependencies and the
    /// given shutdown signal. The embedder owns the cleaner's cron schedule and
    /// distributed lock the same way it owns the scheduler's.
    pub fn build_cleaner(&self, shutdown: ShutdownSignal) -> Cleaner {
        Cleaner::new(
            self.hash_store.clone(),
            self.url_store.clone(),
            self.config.cleaner.clone(),
            shutdown,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        InMemoryHashPool, InMemoryHashStore, InMemoryRateLimiter, InMemoryUrlCache,
        InMemoryUrlStore,
    };
    use crate::validation::{PrivateHostValidator, RawUrlValidator};

    fn build_service() -> ShortenerService {
        let config = ServiceConfig::default();
        let deps = ServiceDeps::with_default_metrics(
            Arc::new(InMemoryHashStore::default()),
            Arc::new(InMemoryUrlStore::default()),
            Arc::new(InMemoryHashPool::default()),
            Arc::new(InMemoryUrlCache::default()),
            Arc::new(InMemoryRateLimiter::new(config.rate_limit.clone())),
            Arc::new(RawUrlValidator::new(config.url_validation.clone())),
            Arc::new(PrivateHostValidator),
            Arc::new(PrivateHostValidator),
        );
        ShortenerService::new(deps, config).unwrap()
    }

    #[tokio::test]
    async fn end_to_end_create_then_resolve() {
        let service = build_service();
        let short = service
            .create_short("https://example.com/a", Principal::User("u1".into()))
            .await
            .unwrap();
        let hash = short.rsplit('/').next().unwrap();

        let resolution = service.resolve(hash, Principal::User("u1".into())).await.unwrap();
        assert_eq!(resolution.url, "https://example.com/a");
    }

    #[tokio::test]
    async fn rate_limit_trips_before_any_durable_work() {
        let mut config = ServiceConfig::default();
        config.rate_limit.capacity = 1;
        config.rate_limit.refill_tokens = 1;
        config.rate_limit.refill_duration_seconds = 60;
        let deps = ServiceDeps::with_default_metrics(
            Arc::new(InMemoryHashStore::default()),
            Arc::new(InMemoryUrlStore::default()),
            Arc::new(InMemoryHashPool::default()),
            Arc::new(InMemoryUrlCache::default()),
            Arc::new(InMemoryRateLimiter::new(config.rate_limit.clone())),
            Arc::new(RawUrlValidator::new(config.url_validation.clone())),
            Arc::new(PrivateHostValidator),
            Arc::new(PrivateHostValidator),
        );
        let service = ShortenerService::new(deps, config).unwrap();
        let principal = Principal::User("u2".into());

        assert!(service
            .create_short("https://example.com/a", principal.clone())
            .await
            .is_ok());
        let second = service
            .create_short("https://example.com/b", principal)
            .await;
        assert!(matches!(second, Err(crate::error::CoreError::RateLimited)));
    }

    #[tokio::test]
    async fn return_hash_makes_it_available_for_the_next_create() {
        let service = build_service();
        service.return_hash("manually-returned").await.unwrap();
        assert_eq!(service.pool.size().await.unwrap(), 1);
    }
}
