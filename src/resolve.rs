//! Resolution pipeline (C10): cache-first lookup, fallback read, cache repair.

use std::sync::Arc;

use crate::cache::UrlCache;
use crate::config::ServiceConfig;
use crate::error::{CoreError, CoreResult};
use crate::metrics::{MetricsSink, SharedMetrics};
use crate::store::UrlStore;
use crate::validation::ValidationHook;

/// The outcome of a successful [`ResolutionPipeline::resolve`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The original URL the hash maps to.
    pub url: String,
    /// Whether the answer came from the cache rather than the durable store.
    pub from_cache: bool,
}

/// Owns every dependency C10 needs: the forward cache, the durable table, and the
/// redirect-time validation hook.
pub struct ResolutionPipeline {
    cache: Arc<dyn UrlCache>,
    url_store: Arc<dyn UrlStore>,
    redirect_validator: Arc<dyn ValidationHook>,
    config: ServiceConfig,
    metrics: SharedMetrics,
}

impl ResolutionPipeline {
    /// Wires up a pipeline from its component dependencies.
    pub fn new(
        cache: Arc<dyn UrlCache>,
        url_store: Arc<dyn UrlStore>,
        redirect_validator: Arc<dyn ValidationHook>,
        config: ServiceConfig,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            cache,
            url_store,
            redirect_validator,
            config,
            metrics,
        }
    }

    /// Resolves `hash` to its original URL, preferring the cache and repairing it on a
    /// durable-store hit. Fails with [`CoreError::NotFound`] for an unknown hash.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, hash: &str) -> CoreResult<Resolution> {
        self.metrics.counter("url.redirect.total", &[]);
        let started = std::time::Instant::now();
        let result = self.resolve_inner(hash).await;
        self.metrics
            .timing("url.redirect.duration", started.elapsed(), &[]);
        match &result {
            Ok(_) => self.metrics.counter("url.redirect.success", &[]),
            Err(CoreError::NotFound) => self.metrics.counter("url.redirect.not_found", &[]),
            Err(CoreError::InvalidUrl(_)) => {
                self.metrics.counter("redirect.validation.failure", &[])
            }
            Err(_) => {}
        }
        result
    }

    async fn resolve_inner(&self, hash: &str) -> CoreResult<Resolution> {
        if let Some(url) = self.cache.get_by_hash(hash).await {
            self.redirect_validator.validate(&url).await?;
            return Ok(Resolution {
                url,
                from_cache: true,
            });
        }

        let url = self
            .url_store
            .find_by_hash(hash)
            .await?
            .ok_or(CoreError::NotFound)?;

        self.cache
            .put(hash, &url, self.config.cache.default_ttl())
            .await;

        self.redirect_validator.validate(&url).await?;
        Ok(Resolution {
            url,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NullMetricsSink;
    use crate::testing::{InMemoryUrlCache, InMemoryUrlStore};
    use crate::validation::PrivateHostValidator;

    fn build_pipeline() -> (ResolutionPipeline, Arc<InMemoryUrlCache>, Arc<InMemoryUrlStore>) {
        let cache = Arc::new(InMemoryUrlCache::default());
        let url_store = Arc::new(InMemoryUrlStore::default());
        let pipeline = ResolutionPipeline::new(
            cache.clone(),
            url_store.clone(),
            Arc::new(PrivateHostValidator),
            ServiceConfig::default(),
            Arc::new(NullMetricsSink),
        );
        (pipeline, cache, url_store)
    }

    #[tokio::test]
    async fn resolves_from_cache_when_present() {
        let (pipeline, cache, _url_store) = build_pipeline();
        cache
            .put("h1", "https://example.com/a", std::time::Duration::from_secs(60))
            .await;

        let resolution = pipeline.resolve("h1").await.unwrap();
        assert_eq!(resolution.url, "https://example.com/a");
        assert!(resolution.from_cache);
    }

    #[tokio::test]
    async fn falls_back_to_store_and_repairs_cache() {
        let (pipeline, cache, url_store) = build_pipeline();
        url_store.insert("h2", "https://example.com/b").await.unwrap();

        let resolution = pipeline.resolve("h2").await.unwrap();
        assert_eq!(resolution.url, "https://example.com/b");
        assert!(!resolution.from_cache);
        assert_eq!(
            cache.get_by_hash("h2").await,
            Some("https://example.com/b".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_hash_yields_not_found() {
        let (pipeline, _cache, _url_store) = build_pipeline();
        assert!(matches!(
            pipeline.resolve("missing").await,
            Err(CoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn resolve_is_a_pure_read_with_no_durable_side_effects() {
        let (pipeline, _cache, url_store) = build_pipeline();
        url_store.insert("h3", "https://example.com/c").await.unwrap();

        pipeline.resolve("h3").await.unwrap();
        pipeline.resolve("h3").await.unwrap();
        assert!(url_store.contains("h3"));
        // No second row, no mutation beyond the original insert: find_by_hash is stable.
        assert_eq!(
            url_store.find_by_hash("h3").await.unwrap(),
            Some("https://example.com/c".to_string())
        );
    }
}
