//! Postgres-backed implementations of [`super::HashStore`] and [`super::UrlStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{HashStore, UrlStore, SCHEMA_SQL};
use crate::error::{CoreError, CoreResult};

/// [`HashStore`] backed by a `hash_records` table and a `hash_sequence` sequence in
/// Postgres.
#[derive(Clone)]
pub struct PgHashStore {
    pool: PgPool,
}

impl PgHashStore {
    /// Wraps an existing pool. Callers share one `PgPool` between [`PgHashStore`] and
    /// [`PgUrlStore`] since both tables live in the same database.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the schema in [`SCHEMA_SQL`]. Idempotent; safe to call on every startup.
    pub async fn migrate(&self) -> CoreResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl HashStore for PgHashStore {
    async fn next_sequence(&self, n: u32) -> CoreResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT nextval('hash_sequence') FROM generate_series(1, $1::int)",
        )
        .bind(n as i32)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    async fn insert_if_absent(&self, hashes: &[String]) -> CoreResult<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO hash_records (hash, available)
             SELECT unnest($1::text[]), true
             ON CONFLICT (hash) DO NOTHING",
        )
        .bind(hashes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_available(&self, n: u32) -> CoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "WITH claimed AS (
                 SELECT hash FROM hash_records
                 WHERE available = true OR available IS NULL
                 ORDER BY hash
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE hash_records
             SET available = false
             WHERE hash IN (SELECT hash FROM claimed)
             RETURNING hash",
        )
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(h,)| h).collect())
    }

    async fn mark_used(&self, hash: &str) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO hash_records (hash, available) VALUES ($1, false)
             ON CONFLICT (hash) DO UPDATE SET available = false",
        )
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_available(&self, hashes: &[String]) -> CoreResult<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO hash_records (hash, available)
             SELECT unnest($1::text[]), true
             ON CONFLICT (hash) DO UPDATE SET available = true",
        )
        .bind(hashes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, hashes: &[String]) -> CoreResult<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM hash_records WHERE hash = ANY($1)")
            .bind(hashes)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// [`UrlStore`] backed by a `url_records` table in Postgres.
#[derive(Clone)]
pub struct PgUrlStore {
    pool: PgPool,
}

impl PgUrlStore {
    /// Wraps an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UrlStore for PgUrlStore {
    async fn insert(&self, hash: &str, url: &str) -> CoreResult<bool> {
        let result = sqlx::query("INSERT INTO url_records (hash, url) VALUES ($1, $2)")
            .bind(hash)
            .bind(url)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => match CoreError::from(err) {
                CoreError::UrlConflict(_) => Ok(false),
                CoreError::HashCollision(_) => Err(CoreError::HashCollision(hash.to_string())),
                other => Err(other),
            },
        }
    }

    async fn find_by_hash(&self, hash: &str) -> CoreResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT url FROM url_records WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(url,)| url))
    }

    async fn find_by_url(&self, url: &str) -> CoreResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT hash FROM url_records WHERE url = $1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(hash,)| hash))
    }

    async fn find_old_hashes(&self, cutoff: DateTime<Utc>, limit: u32) -> CoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT hash FROM url_records WHERE created_at < $1 ORDER BY created_at LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(hash,)| hash).collect())
    }

    async fn delete_by_hashes(&self, hashes: &[String]) -> CoreResult<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM url_records WHERE hash = ANY($1)")
            .bind(hashes)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
