//! URL cache (C8): a two-direction lookup cache on Redis with TTL.
//!
//! The durable store is authoritative; the cache is purely advisory. Every method here
//! swallows backend failures after logging them -- a cache outage degrades latency and
//! hit rate, never correctness. Callers observe a miss, not an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::metrics::{MetricsSink, NullMetricsSink};

/// Two-direction advisory cache for hash/url mappings (C8).
#[async_trait]
pub trait UrlCache: Send + Sync {
    /// Writes both directions under one logical operation. Never returns an error to
    /// the caller; failures are logged and swallowed.
    async fn put(&self, hash: &str, url: &str, ttl: Duration);

    /// Looks up the url cached for `hash`. A miss is indistinguishable from a swallowed
    /// backend failure.
    async fn get_by_hash(&self, hash: &str) -> Option<String>;

    /// Looks up the hash cached for `url`.
    async fn get_hash_by_url(&self, url: &str) -> Option<String>;

    /// Removes both directions for `hash`, if the forward entry is present.
    async fn delete(&self, hash: &str);
}

fn forward_key(hash: &str) -> String {
    format!("url:{hash}")
}

fn reverse_key(url: &str) -> String {
    format!("url_to_hash:{url}")
}

/// Redis-backed [`UrlCache`].
pub struct RedisUrlCache {
    redis: ConnectionManager,
    metrics: Arc<dyn MetricsSink>,
    /// Every cache call is bounded so a slow/partitioned Redis never stalls a request
    /// indefinitely (§5: "no operation is allowed to block indefinitely on a cache call").
    call_timeout: Duration,
}

impl RedisUrlCache {
    /// Wraps a connection manager with a default 250ms per-call timeout and a no-op
    /// metrics sink; use [`RedisUrlCache::with_metrics`] to wire a real sink.
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            metrics: Arc::new(NullMetricsSink),
            call_timeout: Duration::from_millis(250),
        }
    }

    /// Wraps a connection manager with an explicit metrics sink.
    pub fn with_metrics(redis: ConnectionManager, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            redis,
            metrics,
            call_timeout: Duration::from_millis(250),
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "url cache operation failed, treating as miss");
                None
            }
            Err(_) => {
                tracing::warn!("url cache operation timed out, treating as miss");
                None
            }
        }
    }
}

#[async_trait]
impl UrlCache for RedisUrlCache {
    async fn put(&self, hash: &str, url: &str, ttl: Duration) {
        let mut conn = self.redis.clone();
        let ttl_secs = ttl.as_secs().max(1);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set_ex(forward_key(hash), url, ttl_secs)
            .ignore()
            .set_ex(reverse_key(url), hash, ttl_secs)
            .ignore();

        if self
            .bounded::<(), _>(pipe.query_async(&mut conn))
            .await
            .is_none()
        {
            self.metrics.counter("hash.cache.write_failure", &[]);
        }
    }

    async fn get_by_hash(&self, hash: &str) -> Option<String> {
        let mut conn = self.redis.clone();
        let value: Option<String> = self
            .bounded(conn.get(forward_key(hash)))
            .await
            .flatten();
        if value.is_some() {
            self.metrics.counter("url.cache.hit", &[]);
        } else {
            self.metrics.counter("url.cache.miss", &[]);
        }
        value
    }

    async fn get_hash_by_url(&self, url: &str) -> Option<String> {
        let mut conn = self.redis.clone();
        let value: Option<String> = self
            .bounded(conn.get(reverse_key(url)))
            .await
            .flatten();
        if value.is_some() {
            self.metrics.counter("url.cache.hit", &[]);
        } else {
            self.metrics.counter("url.cache.miss", &[]);
        }
        value
    }

    async fn delete(&self, hash: &str) {
        let mut conn = self.redis.clone();
        if let Some(url) = self.get_by_hash(hash).await {
            let _ = self
                .bounded::<(), _>(conn.del(vec![forward_key(hash), reverse_key(&url)]))
                .await;
        } else {
            let _ = self.bounded::<(), _>(conn.del(forward_key(hash))).await;
        }
    }
}
