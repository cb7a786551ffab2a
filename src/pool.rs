//! Hash pool (C5): a shared FIFO of pre-allocated identifiers, backed by a Redis list.
//!
//! `push_back` is `LPUSH`, `pop_front` is `RPOP`, so the list is a FIFO queue ordered
//! oldest-pushed-first. Both are single Redis commands and therefore atomic across
//! process instances without any higher-level locking.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::CoreResult;

/// Shared FIFO queue of pre-allocated identifiers (C5).
#[async_trait]
pub trait HashPool: Send + Sync {
    /// Pushes a hash onto the back of the queue.
    async fn push_back(&self, hash: &str) -> CoreResult<()>;

    /// Pops a hash from the front of the queue, if any are available.
    async fn pop_front(&self) -> CoreResult<Option<String>>;

    /// An estimate of the queue's current length. Advisory only -- never load-bearing
    /// for correctness, only for metrics and refill decisions.
    async fn size(&self) -> CoreResult<u64>;
}

/// Redis-list-backed [`HashPool`].
pub struct RedisHashPool {
    redis: ConnectionManager,
    key: String,
}

impl RedisHashPool {
    /// Wraps a connection manager using `key` (typically `"hash:pool"`, per
    /// [`crate::config::PoolConfig::pool_key`]) as the backing list.
    pub fn new(redis: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            redis,
            key: key.into(),
        }
    }
}

#[async_trait]
impl HashPool for RedisHashPool {
    async fn push_back(&self, hash: &str) -> CoreResult<()> {
        let mut conn = self.redis.clone();
        let _: i64 = conn.lpush(&self.key, hash).await?;
        Ok(())
    }

    async fn pop_front(&self) -> CoreResult<Option<String>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.rpop(&self.key, None).await?;
        Ok(value)
    }

    async fn size(&self) -> CoreResult<u64> {
        let mut conn = self.redis.clone();
        let len: u64 = conn.llen(&self.key).await?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryHashPool;

    #[tokio::test]
    async fn fifo_ordering_is_preserved() {
        let pool = InMemoryHashPool::default();
        pool.push_back("aaa").await.unwrap();
        pool.push_back("bbb").await.unwrap();
        assert_eq!(pool.size().await.unwrap(), 2);
        assert_eq!(pool.pop_front().await.unwrap(), Some("aaa".to_string()));
        assert_eq!(pool.pop_front().await.unwrap(), Some("bbb".to_string()));
        assert_eq!(pool.pop_front().await.unwrap(), None);
    }
}
