//! Durable store layer: the hash table (C2) and URL table (C3).
//!
//! Both tables live behind `async_trait` traits so the pipelines (C9/C10) and the
//! cleaner (C12) can be exercised against [`crate::testing`]'s in-memory fakes without a
//! live Postgres instance, and so a future non-Postgres backend only has to implement
//! the trait once.

mod postgres;

pub use postgres::{PgHashStore, PgUrlStore};

use async_trait::async_trait;

use crate::error::CoreResult;

/// DDL applied by [`PgHashStore::migrate`] / [`PgUrlStore::migrate`]. Kept as a single
/// constant (rather than a `sqlx migrate` directory) since this crate has no CLI of its
/// own; an embedder folds this into its own migration pipeline.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS hash_records (
    hash TEXT PRIMARY KEY,
    available BOOLEAN
);

CREATE INDEX IF NOT EXISTS idx_hash_available
    ON hash_records (hash)
    WHERE available = true OR available IS NULL;

CREATE SEQUENCE IF NOT EXISTS hash_sequence START 1;

CREATE TABLE IF NOT EXISTS url_records (
    hash TEXT PRIMARY KEY REFERENCES hash_records (hash),
    url TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_url_url_unique ON url_records (url);
"#;

/// Durable hash table operations (C2).
#[async_trait]
pub trait HashStore: Send + Sync {
    /// Returns `n` strictly increasing positive integers, never reused across calls.
    async fn next_sequence(&self, n: u32) -> CoreResult<Vec<i64>>;

    /// Inserts each hash as `available=true`; duplicates are silently ignored.
    async fn insert_if_absent(&self, hashes: &[String]) -> CoreResult<()>;

    /// Atomically claims up to `n` rows currently `available=true`, transitioning them
    /// to `available=false`, and returns the claimed hashes. Never blocks indefinitely
    /// on contended rows and never returns the same row to two concurrent callers.
    async fn claim_available(&self, n: u32) -> CoreResult<Vec<String>>;

    /// Upserts a single hash as `available=false`. Used only by the creation pipeline's
    /// on-the-fly fallback.
    async fn mark_used(&self, hash: &str) -> CoreResult<()>;

    /// Inserts or updates each hash to `available=true`; idempotent.
    async fn release_available(&self, hashes: &[String]) -> CoreResult<()>;

    /// Hard-deletes rows. Used only by the cleaner's mid-batch shutdown compensation.
    async fn delete(&self, hashes: &[String]) -> CoreResult<()>;
}

/// Durable URL table operations (C3).
#[async_trait]
pub trait UrlStore: Send + Sync {
    /// Inserts `(hash, url)`. Returns `Ok(true)` on success, `Ok(false)` if `url` already
    /// maps to a different hash (dedup path), [`crate::error::CoreError::HashCollision`]
    /// if `hash` is already taken, or [`crate::error::CoreError::IntegrityError`] for any
    /// other integrity violation.
    async fn insert(&self, hash: &str, url: &str) -> CoreResult<bool>;

    /// Looks up the URL mapped to `hash`, if any.
    async fn find_by_hash(&self, hash: &str) -> CoreResult<Option<String>>;

    /// Looks up the hash mapped to `url`, if any.
    async fn find_by_url(&self, url: &str) -> CoreResult<Option<String>>;

    /// Returns up to `limit` hashes whose `created_at` precedes `cutoff`.
    async fn find_old_hashes(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
        limit: u32,
    ) -> CoreResult<Vec<String>>;

    /// Deletes the URL rows for the given hashes.
    async fn delete_by_hashes(&self, hashes: &[String]) -> CoreResult<()>;
}
