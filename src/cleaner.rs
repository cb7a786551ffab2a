//! Cleaner (C12): a compensating saga that deletes URL rows older than
//! `retention_years`, in batches, and makes their hashes available again.
//!
//! Runs under the `cleanOldUrls` distributed lock on the cron schedule owned by the
//! embedder (typically via [`crate::lock::with_lock`] wired to a `tokio::time::interval`
//! or the `cron` crate, mirroring [`crate::scheduler`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use crate::config::CleanerConfig;
use crate::error::CoreResult;
use crate::retry;
use crate::store::{HashStore, UrlStore};

/// Cooperative shutdown signal polled by [`Cleaner::run_once`] between the release and
/// delete steps of each batch.
#[derive(Default, Clone)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    /// Builds a signal that has not yet fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown; observed by the cleaner at its next poll point.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once [`ShutdownSignal::request`] has been called.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The outcome of a single [`Cleaner::run_once`] invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanerOutcome {
    /// No rows were old enough to clean; the run ended immediately.
    Empty,
    /// One batch was processed to completion (release, then delete).
    BatchCompleted,
    /// Shutdown was observed before the release step ran; no side effects occurred.
    StoppedBeforeRelease,
    /// Shutdown was observed between release and delete; the released rows were
    /// compensated back to unavailable-deleted in C2, restoring invariant 1.
    CompensatedAfterRelease,
}

/// Runs the age-based cleanup saga described in §4.12.
pub struct Cleaner {
    hash_store: Arc<dyn HashStore>,
    url_store: Arc<dyn UrlStore>,
    config: CleanerConfig,
    shutdown: ShutdownSignal,
}

impl Cleaner {
    /// Builds a cleaner from its store dependencies, configuration, and a shutdown
    /// signal shared with the process's lifecycle management.
    pub fn new(
        hash_store: Arc<dyn HashStore>,
        url_store: Arc<dyn UrlStore>,
        config: CleanerConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            hash_store,
            url_store,
            config,
            shutdown,
        }
    }

    /// Processes every eligible batch until none remain or shutdown is requested.
    pub async fn run(&self) -> CoreResult<()> {
        loop {
            match self.run_once().await? {
                CleanerOutcome::BatchCompleted => continue,
                CleanerOutcome::Empty
                | CleanerOutcome::StoppedBeforeRelease
                | CleanerOutcome::CompensatedAfterRelease => return Ok(()),
            }
        }
    }

    /// Processes a single batch: find old hashes, release them in C2, delete them from
    /// C3, observing the shutdown signal between the two steps.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> CoreResult<CleanerOutcome> {
        if self.shutdown.is_set() {
            tracing::info!("cleaner shutdown observed before release step; stopping");
            return Ok(CleanerOutcome::StoppedBeforeRelease);
        }

        let cutoff = Utc::now() - ChronoDuration::days(365 * self.config.retention_years as i64);
        let hashes = self
            .url_store
            .find_old_hashes(cutoff, self.config.batch_size)
            .await?;

        if hashes.is_empty() {
            return Ok(CleanerOutcome::Empty);
        }

        retry::execute_default(&self.config.retry, || {
            let hashes = hashes.clone();
            async move { self.hash_store.release_available(&hashes).await }
        })
        .await?;

        if self.shutdown.is_set() {
            tracing::warn!(
                count = hashes.len(),
                "cleaner shutdown observed between release and delete; compensating"
            );
            self.hash_store.delete(&hashes).await?;
            return Ok(CleanerOutcome::CompensatedAfterRelease);
        }

        retry::execute_default(&self.config.retry, || {
            let hashes = hashes.clone();
            async move { self.url_store.delete_by_hashes(&hashes).await }
        })
        .await?;

        Ok(CleanerOutcome::BatchCompleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryHashStore, InMemoryUrlStore};
    use chrono::Duration as ChronoDuration;

    fn old_timestamp() -> chrono::DateTime<Utc> {
        Utc::now() - ChronoDuration::days(800)
    }

    #[tokio::test]
    async fn empty_store_terminates_successfully_with_no_side_effects() {
        let hash_store = Arc::new(InMemoryHashStore::default());
        let url_store = Arc::new(InMemoryUrlStore::default());
        let cleaner = Cleaner::new(
            hash_store,
            url_store,
            CleanerConfig::default(),
            ShutdownSignal::new(),
        );
        assert_eq!(cleaner.run_once().await.unwrap(), CleanerOutcome::Empty);
    }

    #[tokio::test]
    async fn full_run_releases_and_deletes_old_rows() {
        let hash_store = Arc::new(InMemoryHashStore::default());
        let url_store = Arc::new(InMemoryUrlStore::default());
        hash_store.mark_used("h1").await.unwrap();
        url_store.seed("h1", "https://example.com/old", old_timestamp());

        let cleaner = Cleaner::new(
            hash_store.clone(),
            url_store.clone(),
            CleanerConfig::default(),
            ShutdownSignal::new(),
        );
        assert_eq!(
            cleaner.run_once().await.unwrap(),
            CleanerOutcome::BatchCompleted
        );
        assert!(!url_store.contains("h1"));
        assert!(!hash_store.is_claimed("h1"));
    }

    #[tokio::test]
    async fn shutdown_before_release_is_a_pure_noop() {
        let hash_store = Arc::new(InMemoryHashStore::default());
        let url_store = Arc::new(InMemoryUrlStore::default());
        hash_store.mark_used("h1").await.unwrap();
        url_store.seed("h1", "https://example.com/old", old_timestamp());

        let shutdown = ShutdownSignal::new();
        shutdown.request();
        let cleaner = Cleaner::new(hash_store.clone(), url_store.clone(), CleanerConfig::default(), shutdown);

        assert_eq!(
            cleaner.run_once().await.unwrap(),
            CleanerOutcome::StoppedBeforeRelease
        );
        assert!(url_store.contains("h1"));
        assert!(hash_store.is_claimed("h1"));
    }

    /// A [`HashStore`] decorator that requests shutdown the instant `release_available`
    /// completes, letting the test deterministically land the signal exactly between
    /// the cleaner's release and delete steps -- scenario S6 from `spec.md`.
    struct ShutdownOnRelease {
        inner: Arc<InMemoryHashStore>,
        shutdown: ShutdownSignal,
    }

    #[async_trait::async_trait]
    impl HashStore for ShutdownOnRelease {
        async fn next_sequence(&self, n: u32) -> CoreResult<Vec<i64>> {
            self.inner.next_sequence(n).await
        }
        async fn insert_if_absent(&self, hashes: &[String]) -> CoreResult<()> {
            self.inner.insert_if_absent(hashes).await
        }
        async fn claim_available(&self, n: u32) -> CoreResult<Vec<String>> {
            self.inner.claim_available(n).await
        }
        async fn mark_used(&self, hash: &str) -> CoreResult<()> {
            self.inner.mark_used(hash).await
        }
        async fn release_available(&self, hashes: &[String]) -> CoreResult<()> {
            let result = self.inner.release_available(hashes).await;
            self.shutdown.request();
            result
        }
        async fn delete(&self, hashes: &[String]) -> CoreResult<()> {
            self.inner.delete(hashes).await
        }
    }

    /// Mirrors scenario S6: shutdown signaled after the release step but before delete
    /// compensates by removing the released hash from C2 entirely, so invariant 1 (every
    /// C3 row has a C2 row with `available=false`) holds: C3 still has the row, and C2 no
    /// longer has a stray `available=true` row for it.
    #[tokio::test]
    async fn shutdown_between_release_and_delete_compensates() {
        let inner = Arc::new(InMemoryHashStore::default());
        inner.mark_used("h1").await.unwrap();
        let url_store = Arc::new(InMemoryUrlStore::default());
        url_store.seed("h1", "https://example.com/old", old_timestamp());

        let shutdown = ShutdownSignal::new();
        let hash_store: Arc<dyn HashStore> = Arc::new(ShutdownOnRelease {
            inner: inner.clone(),
            shutdown: shutdown.clone(),
        });

        let cleaner = Cleaner::new(hash_store, url_store.clone(), CleanerConfig::default(), shutdown);

        let outcome = cleaner.run_once().await.unwrap();
        assert_eq!(outcome, CleanerOutcome::CompensatedAfterRelease);
        assert!(url_store.contains("h1"));
        assert!(inner.is_absent("h1"));
    }
}
