//! In-memory fakes for every storage/cache/lock seam, so the pipelines, the scheduler,
//! and the cleaner can be exercised in `#[tokio::test]`s without a live Postgres or
//! Redis instance. Gated behind the `test-util` feature, which this crate's own tests
//! enable implicitly and `tests/` integration tests enable via the dev-dependency
//! declaration in `Cargo.toml`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::cache::UrlCache;
use crate::config::RateLimitConfig;
use crate::error::{CoreError, CoreResult};
use crate::pool::HashPool;
use crate::ratelimit::{Principal, RateLimiter};
use crate::store::{HashStore, UrlStore};

#[derive(Debug, Clone)]
struct HashRow {
    available: bool,
}

/// In-memory [`HashStore`] (C2). Sequence values are a process-local atomic counter;
/// `available` rows are tracked in a plain map guarded by a `parking_lot::Mutex`, which
/// is sufficient to model "never returns the same row twice concurrently" under the
/// single-process concurrency these tests exercise.
#[derive(Default)]
pub struct InMemoryHashStore {
    sequence: AtomicI64,
    rows: Mutex<std::collections::BTreeMap<String, HashRow>>,
}

#[async_trait]
impl HashStore for InMemoryHashStore {
    async fn next_sequence(&self, n: u32) -> CoreResult<Vec<i64>> {
        let start = self.sequence.fetch_add(n as i64, Ordering::SeqCst) + 1;
        Ok((start..start + n as i64).collect())
    }

    async fn insert_if_absent(&self, hashes: &[String]) -> CoreResult<()> {
        let mut rows = self.rows.lock();
        for hash in hashes {
            rows.entry(hash.clone())
                .or_insert(HashRow { available: true });
        }
        Ok(())
    }

    async fn claim_available(&self, n: u32) -> CoreResult<Vec<String>> {
        let mut rows = self.rows.lock();
        let candidates: Vec<String> = rows
            .iter()
            .filter(|(_, row)| row.available)
            .take(n as usize)
            .map(|(hash, _)| hash.clone())
            .collect();
        for hash in &candidates {
            rows.get_mut(hash).unwrap().available = false;
        }
        Ok(candidates)
    }

    async fn mark_used(&self, hash: &str) -> CoreResult<()> {
        self.rows
            .lock()
            .insert(hash.to_string(), HashRow { available: false });
        Ok(())
    }

    async fn release_available(&self, hashes: &[String]) -> CoreResult<()> {
        let mut rows = self.rows.lock();
        for hash in hashes {
            rows.insert(hash.clone(), HashRow { available: true });
        }
        Ok(())
    }

    async fn delete(&self, hashes: &[String]) -> CoreResult<()> {
        let mut rows = self.rows.lock();
        for hash in hashes {
            rows.remove(hash);
        }
        Ok(())
    }
}

impl InMemoryHashStore {
    /// Test helper: true iff `hash` is known and `available=false`.
    pub fn is_claimed(&self, hash: &str) -> bool {
        matches!(self.rows.lock().get(hash), Some(row) if !row.available)
    }

    /// Test helper: true iff `hash` has no row at all (fully deleted).
    pub fn is_absent(&self, hash: &str) -> bool {
        !self.rows.lock().contains_key(hash)
    }
}

#[derive(Debug, Clone)]
struct UrlRow {
    url: String,
    created_at: DateTime<Utc>,
}

/// In-memory [`UrlStore`] (C3), enforcing the same two unique constraints Postgres would.
#[derive(Default)]
pub struct InMemoryUrlStore {
    by_hash: Mutex<std::collections::BTreeMap<String, UrlRow>>,
}

#[async_trait]
impl UrlStore for InMemoryUrlStore {
    async fn insert(&self, hash: &str, url: &str) -> CoreResult<bool> {
        let mut rows = self.by_hash.lock();
        if rows.contains_key(hash) {
            return Err(CoreError::HashCollision(hash.to_string()));
        }
        if rows.values().any(|row| row.url == url) {
            return Ok(false);
        }
        rows.insert(
            hash.to_string(),
            UrlRow {
                url: url.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn find_by_hash(&self, hash: &str) -> CoreResult<Option<String>> {
        Ok(self.by_hash.lock().get(hash).map(|row| row.url.clone()))
    }

    async fn find_by_url(&self, url: &str) -> CoreResult<Option<String>> {
        Ok(self
            .by_hash
            .lock()
            .iter()
            .find(|(_, row)| row.url == url)
            .map(|(hash, _)| hash.clone()))
    }

    async fn find_old_hashes(&self, cutoff: DateTime<Utc>, limit: u32) -> CoreResult<Vec<String>> {
        Ok(self
            .by_hash
            .lock()
            .iter()
            .filter(|(_, row)| row.created_at < cutoff)
            .take(limit as usize)
            .map(|(hash, _)| hash.clone())
            .collect())
    }

    async fn delete_by_hashes(&self, hashes: &[String]) -> CoreResult<()> {
        let mut rows = self.by_hash.lock();
        for hash in hashes {
            rows.remove(hash);
        }
        Ok(())
    }
}

impl InMemoryUrlStore {
    /// Test helper: seeds a row with an explicit `created_at`, bypassing `insert`'s
    /// `Utc::now()` stamp -- used to set up the cleaner's age-based scenarios.
    pub fn seed(&self, hash: &str, url: &str, created_at: DateTime<Utc>) {
        self.by_hash.lock().insert(
            hash.to_string(),
            UrlRow {
                url: url.to_string(),
                created_at,
            },
        );
    }

    /// Test helper: true iff a row for `hash` still exists.
    pub fn contains(&self, hash: &str) -> bool {
        self.by_hash.lock().contains_key(hash)
    }
}

/// In-memory [`HashPool`] (C5): a plain `VecDeque` guarded by a mutex.
#[derive(Default)]
pub struct InMemoryHashPool {
    queue: Mutex<VecDeque<String>>,
}

#[async_trait]
impl HashPool for InMemoryHashPool {
    async fn push_back(&self, hash: &str) -> CoreResult<()> {
        self.queue.lock().push_back(hash.to_string());
        Ok(())
    }

    async fn pop_front(&self) -> CoreResult<Option<String>> {
        Ok(self.queue.lock().pop_front())
    }

    async fn size(&self) -> CoreResult<u64> {
        Ok(self.queue.lock().len() as u64)
    }
}

#[derive(Default, Clone)]
struct CacheEntry {
    value: String,
}

/// In-memory [`UrlCache`] (C8). TTLs are tracked but expiry is driven by explicit
/// `advance` calls rather than wall-clock time, so TTL-expiry tests are deterministic.
#[derive(Default)]
pub struct InMemoryUrlCache {
    forward: Mutex<std::collections::HashMap<String, (CacheEntry, Duration)>>,
    reverse: Mutex<std::collections::HashMap<String, (CacheEntry, Duration)>>,
}

#[async_trait]
impl UrlCache for InMemoryUrlCache {
    async fn put(&self, hash: &str, url: &str, ttl: Duration) {
        self.forward.lock().insert(
            hash.to_string(),
            (
                CacheEntry {
                    value: url.to_string(),
                },
                ttl,
            ),
        );
        self.reverse.lock().insert(
            url.to_string(),
            (
                CacheEntry {
                    value: hash.to_string(),
                },
                ttl,
            ),
        );
    }

    async fn get_by_hash(&self, hash: &str) -> Option<String> {
        self.forward
            .lock()
            .get(hash)
            .map(|(entry, _)| entry.value.clone())
    }

    async fn get_hash_by_url(&self, url: &str) -> Option<String> {
        self.reverse
            .lock()
            .get(url)
            .map(|(entry, _)| entry.value.clone())
    }

    async fn delete(&self, hash: &str) {
        if let Some((entry, _)) = self.forward.lock().remove(hash) {
            self.reverse.lock().remove(&entry.value);
        }
    }
}

impl InMemoryUrlCache {
    /// Test helper: simulates TTL expiry by dropping every entry unconditionally.
    pub fn expire_all(&self) {
        self.forward.lock().clear();
        self.reverse.lock().clear();
    }
}

/// In-memory token-bucket [`RateLimiter`] (C11) driven by an injectable clock so tests
/// can exercise refill without sleeping in real time.
pub struct InMemoryRateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<std::collections::HashMap<String, (f64, u64)>>,
    now: Arc<Mutex<u64>>,
}

impl InMemoryRateLimiter {
    /// Builds a limiter starting its clock at zero.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(std::collections::HashMap::new()),
            now: Arc::new(Mutex::new(0)),
        }
    }

    /// Advances the fake clock by `secs`, as if `secs` seconds of wall time elapsed.
    pub fn advance(&self, secs: u64) {
        *self.now.lock() += secs;
    }
}

fn bucket_key(principal: &Principal) -> String {
    match principal {
        Principal::User(id) => format!("rate-limit:user:{id}"),
        Principal::Anonymous => "rate-limit:anonymous".to_string(),
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, principal: &Principal) -> CoreResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let key = bucket_key(principal);
        let now = *self.now.lock();
        let mut buckets = self.buckets.lock();
        let (tokens, last_refill) = buckets
            .entry(key)
            .or_insert((self.config.capacity as f64, now));

        let elapsed = now.saturating_sub(*last_refill);
        let intervals = elapsed / self.config.refill_duration_seconds.max(1);
        if intervals > 0 {
            *tokens = (*tokens + (intervals * self.config.refill_tokens) as f64)
                .min(self.config.capacity as f64);
            *last_refill += intervals * self.config.refill_duration_seconds;
        }

        if *tokens >= 1.0 {
            *tokens -= 1.0;
            Ok(())
        } else {
            Err(CoreError::RateLimited)
        }
    }
}

/// In-memory stand-in for the distributed lock (C17), exclusive per resource name within
/// the test process. See [`crate::lock::fake::FakeLockRegistry`] for the lock crate's own
/// unit tests; this wrapper is reused by pipeline/scheduler/cleaner integration tests.
#[derive(Default, Clone)]
pub struct InMemoryLock {
    held: Arc<Mutex<std::collections::HashSet<String>>>,
}

impl InMemoryLock {
    /// Attempts to acquire `resource`; returns `false` if already held.
    pub fn try_acquire(&self, resource: &str) -> bool {
        self.held.lock().insert(resource.to_string())
    }

    /// Releases `resource` unconditionally.
    pub fn release(&self, resource: &str) {
        self.held.lock().remove(resource);
    }
}
