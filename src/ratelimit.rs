//! Rate limiter (C11): token buckets keyed by principal, stored in Redis.
//!
//! Refill-and-consume runs as a single Lua script so concurrent consumers across
//! multiple process instances observe a consistent bucket -- the shared Redis key plus
//! the atomic script is the coordination point described in §5.

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::config::RateLimitConfig;
use crate::error::{CoreError, CoreResult};

/// Atomic token-bucket refill + consume. `KEYS[1]` is the bucket key; `ARGV` is
/// `[capacity, refill_tokens, refill_interval_seconds, now_seconds, bucket_ttl_seconds]`.
/// Returns `1` if a token was consumed, `0` if the bucket was empty.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_tokens = tonumber(ARGV[2])
local refill_interval = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local bucket_ttl = tonumber(ARGV[5])

local state = redis.call("HMGET", key, "tokens", "last_refill")
local tokens = tonumber(state[1])
local last_refill = tonumber(state[2])

if tokens == nil then
    tokens = capacity
    last_refill = now
end

local elapsed = math.max(0, now - last_refill)
local intervals = math.floor(elapsed / refill_interval)
if intervals > 0 then
    tokens = math.min(capacity, tokens + intervals * refill_tokens)
    last_refill = last_refill + intervals * refill_interval
end

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

redis.call("HMSET", key, "tokens", tokens, "last_refill", last_refill)
redis.call("EXPIRE", key, bucket_ttl)

return allowed
"#;

/// Principal identity for a rate-limit check. Anonymous callers share a single bucket.
#[derive(Debug, Clone)]
pub enum Principal {
    /// An identified caller; resolves to `rate-limit:user:{id}`.
    User(String),
    /// An unidentified caller; resolves to the shared `rate-limit:anonymous` bucket.
    Anonymous,
}

impl Principal {
    fn bucket_key(&self) -> String {
        match self {
            Principal::User(id) => format!("rate-limit:user:{id}"),
            Principal::Anonymous => "rate-limit:anonymous".to_string(),
        }
    }
}

/// Token-bucket rate limiter (C11).
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Attempts to consume one token for `principal`. Returns
    /// [`CoreError::RateLimited`] if the bucket is currently empty.
    async fn check(&self, principal: &Principal) -> CoreResult<()>;
}

/// Redis-backed [`RateLimiter`].
pub struct RedisRateLimiter {
    redis: ConnectionManager,
    config: RateLimitConfig,
}

impl RedisRateLimiter {
    /// Wraps a connection manager with the limiter's configuration.
    pub fn new(redis: ConnectionManager, config: RateLimitConfig) -> Self {
        Self { redis, config }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, principal: &Principal) -> CoreResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let key = principal.bucket_key();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock is after the unix epoch")
            .as_secs();
        let bucket_ttl = self.config.bucket_expiration_minutes * 60;

        let mut conn = self.redis.clone();
        let allowed: i64 = redis::cmd("EVAL")
            .arg(TOKEN_BUCKET_SCRIPT)
            .arg(1)
            .arg(&key)
            .arg(self.config.capacity)
            .arg(self.config.refill_tokens)
            .arg(self.config.refill_duration_seconds)
            .arg(now)
            .arg(bucket_ttl)
            .query_async(&mut conn)
            .await?;

        if allowed == 1 {
            Ok(())
        } else {
            tracing::debug!(bucket = %key, "rate limit exceeded");
            Err(CoreError::RateLimited)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryRateLimiter;

    #[tokio::test]
    async fn admits_up_to_capacity_then_trips() {
        let config = RateLimitConfig {
            capacity: 2,
            refill_tokens: 2,
            refill_duration_seconds: 60,
            enabled: true,
            bucket_expiration_minutes: 10,
        };
        let limiter = InMemoryRateLimiter::new(config);
        let principal = Principal::User("u4".to_string());

        assert!(limiter.check(&principal).await.is_ok());
        assert!(limiter.check(&principal).await.is_ok());
        assert!(matches!(
            limiter.check(&principal).await,
            Err(CoreError::RateLimited)
        ));
    }

    #[tokio::test]
    async fn disabled_limiter_never_trips() {
        let config = RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        };
        let limiter = InMemoryRateLimiter::new(config);
        let principal = Principal::Anonymous;
        for _ in 0..100 {
            assert!(limiter.check(&principal).await.is_ok());
        }
    }

    #[tokio::test]
    async fn anonymous_principals_share_one_bucket() {
        assert_eq!(
            Principal::Anonymous.bucket_key(),
            Principal::Anonymous.bucket_key()
        );
    }
}
