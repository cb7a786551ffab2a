//! Creation pipeline (C9): normalize, de-duplicate, allocate, persist, populate cache.
//!
//! Rate limiting (C11) is not part of this module -- per §2's control flow, the gate
//! runs at the service facade before either pipeline is entered. Everything below
//! assumes the caller already cleared that gate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::cache::UrlCache;
use crate::codec;
use crate::config::ServiceConfig;
use crate::error::{CoreError, CoreResult};
use crate::metrics::{MetricsSink, SharedMetrics};
use crate::pool::HashPool;
use crate::retry;
use crate::store::{HashStore, UrlStore};
use crate::validation::{normalize, ValidationHook};

/// Owns every dependency C9 needs: the two validation hooks, the cache, the durable
/// tables, the pool, and a bounded semaphore for the on-the-fly fallback path.
pub struct CreationPipeline {
    raw_validator: Arc<dyn ValidationHook>,
    normalized_validator: Arc<dyn ValidationHook>,
    cache: Arc<dyn UrlCache>,
    url_store: Arc<dyn UrlStore>,
    hash_store: Arc<dyn HashStore>,
    pool: Arc<dyn HashPool>,
    fallback_permits: Arc<Semaphore>,
    config: ServiceConfig,
    metrics: SharedMetrics,
}

impl CreationPipeline {
    /// Wires up a pipeline from its component dependencies.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        raw_validator: Arc<dyn ValidationHook>,
        normalized_validator: Arc<dyn ValidationHook>,
        cache: Arc<dyn UrlCache>,
        url_store: Arc<dyn UrlStore>,
        hash_store: Arc<dyn HashStore>,
        pool: Arc<dyn HashPool>,
        config: ServiceConfig,
        metrics: SharedMetrics,
    ) -> Self {
        let fallback_permits = Arc::new(Semaphore::new(config.pool.fallback_max_concurrent));
        Self {
            raw_validator,
            normalized_validator,
            cache,
            url_store,
            hash_store,
            pool,
            fallback_permits,
            config,
            metrics,
        }
    }

    /// Runs the full creation pipeline for `raw_url` and returns the built short URL.
    #[tracing::instrument(skip(self, raw_url), fields(url_len = raw_url.len()))]
    pub async fn create_short(&self, raw_url: &str) -> CoreResult<String> {
        self.metrics.counter("url.creation.total", &[]);
        let started = std::time::Instant::now();
        let result = self.create_short_inner(raw_url).await;
        self.metrics
            .timing("url.creation.duration", started.elapsed(), &[]);
        match &result {
            Ok(_) => self.metrics.counter("url.creation.success", &[]),
            Err(err) => {
                self.metrics.counter("url.creation.failure", &[]);
                if matches!(err, CoreError::InvalidUrl(_)) {
                    self.metrics.counter("url.validation.failure", &[]);
                }
            }
        }
        result
    }

    async fn create_short_inner(&self, raw_url: &str) -> CoreResult<String> {
        // Step 1: validate-raw.
        self.raw_validator.validate(raw_url).await?;

        // Step 2: normalize.
        let normalized = normalize(raw_url, &self.config.url_validation)?;

        // Step 3: validate-normalized.
        self.normalized_validator.validate(&normalized).await?;

        // Step 4: dedup, reverse cache then reverse table.
        if let Some(hash) = self.cache.get_hash_by_url(&normalized).await {
            self.cache
                .put(&hash, &normalized, self.config.cache.default_ttl())
                .await;
            return Ok(self.build_short_url(&hash));
        }
        if let Some(hash) = self.url_store.find_by_url(&normalized).await? {
            self.cache
                .put(&hash, &normalized, self.config.cache.default_ttl())
                .await;
            return Ok(self.build_short_url(&hash));
        }

        // Step 5: claim a hash.
        let hash = self.claim_hash().await?;

        // Step 6: persist, with conflict and collision handling.
        match self.persist(&hash, &normalized).await {
            Ok(true) => {
                self.cache
                    .put(&hash, &normalized, self.config.cache.default_ttl())
                    .await;
                Ok(self.build_short_url(&hash))
            }
            Ok(false) => {
                // Another writer won the race on this URL between our dedup check and
                // our insert. Return the claimed hash to the pool and use theirs.
                self.metrics.counter("url.conflict", &[]);
                let winner = self
                    .url_store
                    .find_by_url(&normalized)
                    .await?
                    .ok_or_else(|| {
                        CoreError::IntegrityError(
                            "url conflict reported but no row found on follow-up lookup".into(),
                        )
                    })?;
                if let Err(err) = self.pool.push_back(&hash).await {
                    tracing::warn!(error = %err, hash = %hash, "failed to return claimed hash to pool after url conflict");
                }
                self.cache
                    .put(&winner, &normalized, self.config.cache.default_ttl())
                    .await;
                Ok(self.build_short_url(&winner))
            }
            Err(err) => Err(err),
        }
    }

    /// Step 5: pool first, then `claim_available(1)` under a bounded fallback permit,
    /// then on-the-fly generation as a last resort.
    async fn claim_hash(&self) -> CoreResult<String> {
        if let Some(hash) = self.pool.pop_front().await? {
            self.metrics.counter("hash.cache.hit", &[]);
            return Ok(hash);
        }
        self.metrics.counter("hash.cache.miss", &[]);

        let permit =
            tokio::time::timeout(Duration::from_secs(1), self.fallback_permits.acquire()).await;
        let _permit = match permit {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(CoreError::Unavailable),
            Err(_) => return Err(CoreError::Unavailable),
        };

        self.metrics.counter("hash.cache.fallback", &[]);
        let claimed = self.hash_store.claim_available(1).await?;
        if let Some(hash) = claimed.into_iter().next() {
            return Ok(hash);
        }

        // Last resort: generate a single hash on the fly.
        self.metrics.counter("hash.generation.on_the_fly", &[]);
        let sequence = self.hash_store.next_sequence(1).await?;
        let n = sequence
            .into_iter()
            .next()
            .ok_or(CoreError::NoAvailableHash)?;
        let hash = codec::encode(n)?;
        self.hash_store.mark_used(&hash).await?;
        Ok(hash)
    }

    /// Step 6: persist under the outer retry policy, which only retries
    /// `IntegrityError` other than a URL conflict. URL conflicts surface as `Ok(false)`
    /// from [`UrlStore::insert`] and are never retried (there is nothing transient about
    /// them); hash collisions propagate immediately as fatal for this attempt.
    async fn persist(&self, hash: &str, normalized_url: &str) -> CoreResult<bool> {
        retry::execute(
            &self.config.retry,
            |err| matches!(err, CoreError::IntegrityError(_)),
            || async { self.url_store.insert(hash, normalized_url).await },
        )
        .await
    }

    fn build_short_url(&self, hash: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::metrics::NullMetricsSink;
    use crate::testing::{InMemoryHashPool, InMemoryHashStore, InMemoryUrlCache, InMemoryUrlStore};
    use crate::validation::{PrivateHostValidator, RawUrlValidator};

    fn build_pipeline() -> (
        CreationPipeline,
        Arc<InMemoryHashPool>,
        Arc<InMemoryHashStore>,
        Arc<InMemoryUrlStore>,
    ) {
        let config = ServiceConfig::default();
        let pool = Arc::new(InMemoryHashPool::default());
        let hash_store = Arc::new(InMemoryHashStore::default());
        let url_store = Arc::new(InMemoryUrlStore::default());
        let cache = Arc::new(InMemoryUrlCache::default());
        let pipeline = CreationPipeline::new(
            Arc::new(RawUrlValidator::new(config.url_validation.clone())),
            Arc::new(PrivateHostValidator),
            cache,
            url_store.clone(),
            hash_store.clone(),
            pool.clone(),
            config,
            Arc::new(NullMetricsSink),
        );
        (pipeline, pool, hash_store, url_store)
    }

    #[tokio::test]
    async fn happy_path_pops_from_pool_and_persists() {
        let (pipeline, pool, hash_store, url_store) = build_pipeline();
        hash_store.insert_if_absent(&["h1".to_string()]).await.unwrap();
        pool.push_back("h1").await.unwrap();

        let short = pipeline.create_short("https://example.com/a").await.unwrap();
        assert!(short.ends_with("/h1"));
        assert_eq!(
            url_store.find_by_hash("h1").await.unwrap(),
            Some("https://example.com/a".to_string())
        );
        assert_eq!(pool.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn repeat_create_is_deduplicated_via_table_and_consumes_no_extra_hash() {
        let (pipeline, pool, hash_store, _url_store) = build_pipeline();
        hash_store
            .insert_if_absent(&["h1".to_string(), "h2".to_string()])
            .await
            .unwrap();
        pool.push_back("h1").await.unwrap();
        pool.push_back("h2").await.unwrap();

        let first = pipeline.create_short("https://example.com/b").await.unwrap();
        let second = pipeline.create_short("https://example.com/b").await.unwrap();
        assert_eq!(first, second);
        // Only the first call should have consumed a pool hash.
        assert_eq!(pool.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn url_conflict_returns_claimed_hash_to_pool() {
        let (pipeline, pool, hash_store, url_store) = build_pipeline();
        hash_store
            .insert_if_absent(&["h1".to_string(), "h2".to_string()])
            .await
            .unwrap();
        pool.push_back("h1").await.unwrap();
        pool.push_back("h2").await.unwrap();
        // Seed the table directly, simulating a winner that already committed this URL.
        url_store.insert("h1", "https://example.com/c").await.unwrap();

        let short = pipeline.create_short("https://example.com/c").await.unwrap();
        assert!(short.ends_with("/h1"));
        // h2 was claimed from the pool, then returned on conflict.
        assert_eq!(pool.size().await.unwrap(), 1);
        assert_eq!(pool.pop_front().await.unwrap(), Some("h2".to_string()));
    }

    #[tokio::test]
    async fn empty_pool_falls_back_to_claim_available() {
        let (pipeline, _pool, hash_store, _url_store) = build_pipeline();
        hash_store.insert_if_absent(&["h9".to_string()]).await.unwrap();

        let short = pipeline.create_short("https://example.com/d").await.unwrap();
        assert!(short.ends_with("/h9"));
        assert!(hash_store.is_claimed("h9"));
    }

    #[tokio::test]
    async fn empty_pool_and_empty_store_falls_back_to_on_the_fly_generation() {
        let (pipeline, _pool, _hash_store, url_store) = build_pipeline();
        let short = pipeline.create_short("https://example.com/e").await.unwrap();
        assert!(url_store.find_by_hash(short.rsplit('/').next().unwrap()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn forbidden_scheme_is_rejected_before_any_store_access() {
        let (pipeline, _pool, hash_store, _url_store) = build_pipeline();
        let result = pipeline.create_short("javascript:alert(1)").await;
        assert!(matches!(result, Err(CoreError::InvalidUrl(_))));
        assert!(hash_store.is_absent("h1"));
    }

    #[tokio::test]
    async fn oversized_url_is_rejected() {
        let (pipeline, _pool, _hash_store, _url_store) = build_pipeline();
        let long = format!("https://example.com/{}", "a".repeat(3000));
        let result = pipeline.create_short(&long).await;
        assert!(matches!(result, Err(CoreError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn private_host_is_rejected() {
        let (pipeline, _pool, _hash_store, _url_store) = build_pipeline();
        let result = pipeline.create_short("https://127.0.0.1/admin").await;
        assert!(matches!(result, Err(CoreError::InvalidUrl(_))));
    }
}
