//! Distributed lock (C17).
//!
//! Cluster-wide named mutual exclusion on top of Redis: `SET key token NX EX ttl` to
//! acquire, a check-and-delete Lua script to release, and a check-and-expire Lua script
//! to extend. The token (a random UUID per acquisition) means a process can never
//! release or extend a lock it no longer holds, even if the key's TTL elapsed and
//! another process has since acquired it -- the classic single-instance Redlock idiom.

use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("expire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// A held distributed lock. Dropping it without calling [`DistributedLock::release`]
/// leaves the key to expire on its own after `lock_at_most_for`; this is intentional --
/// it is how a crashed holder stops blocking others.
pub struct DistributedLock {
    redis: ConnectionManager,
    key: String,
    token: String,
}

impl DistributedLock {
    /// Attempts to acquire the named lock for `ttl`. Returns `Ok(None)` if another
    /// holder currently owns it -- this is not an error, just contention.
    pub async fn acquire(
        mut redis: ConnectionManager,
        resource: &str,
        ttl: std::time::Duration,
    ) -> CoreResult<Option<Self>> {
        let key = format!("lock:{resource}");
        let token = Uuid::new_v4().to_string();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut redis)
            .await?;

        if acquired.is_some() {
            tracing::debug!(lock = %key, "distributed lock acquired");
            Ok(Some(Self { redis, key, token }))
        } else {
            tracing::debug!(lock = %key, "distributed lock contended");
            Ok(None)
        }
    }

    /// Extends the lock's TTL, provided this holder's token still matches. Returns
    /// `false` if the lock was lost (expired and possibly re-acquired elsewhere).
    pub async fn extend(&mut self, ttl: std::time::Duration) -> CoreResult<bool> {
        let result: i32 = redis::cmd("EVAL")
            .arg(EXTEND_SCRIPT)
            .arg(1)
            .arg(&self.key)
            .arg(&self.token)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut self.redis)
            .await?;
        Ok(result == 1)
    }

    /// Releases the lock if this holder's token still matches; a no-op otherwise.
    pub async fn release(mut self) -> CoreResult<()> {
        let _: i32 = redis::cmd("EVAL")
            .arg(RELEASE_SCRIPT)
            .arg(1)
            .arg(&self.key)
            .arg(&self.token)
            .query_async(&mut self.redis)
            .await?;
        tracing::debug!(lock = %self.key, "distributed lock released");
        Ok(())
    }
}

/// Runs `work` while holding the named lock, honoring `lock_at_least_for` (a minimum
/// hold even if `work` finishes early, so two ticks of a periodic job never overlap)
/// and `lock_at_most_for` (the key TTL, bounding how long a crashed holder blocks
/// others). If the lock is contended, returns `Ok(false)` without running `work`.
pub async fn with_lock<F, Fut, T>(
    redis: ConnectionManager,
    resource: &str,
    lock_at_least_for: std::time::Duration,
    lock_at_most_for: std::time::Duration,
    work: F,
) -> CoreResult<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = CoreResult<T>>,
{
    let lock = match DistributedLock::acquire(redis, resource, lock_at_most_for).await? {
        Some(lock) => lock,
        None => return Ok(None),
    };

    let started = tokio::time::Instant::now();
    let result = work().await;

    let elapsed = started.elapsed();
    if elapsed < lock_at_least_for {
        tokio::time::sleep(lock_at_least_for - elapsed).await;
    }

    match lock.release().await {
        Ok(()) => {}
        Err(err) => tracing::warn!(error = %err, "failed to release distributed lock"),
    }

    result.map(Some)
}
