//! Typed, `Default`-backed configuration for every tunable enumerated in the
//! component design. Each sub-config validates its own bounds; [`ServiceConfig`]
//! aggregates all of them and is the single value a [`crate::service::ShortenerService`]
//! is built from.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Retry executor parameters (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of attempts before giving up, inclusive of the first try. Bounds: 1..=10.
    pub max_attempts: u32,
    /// Fixed delay between attempts, in milliseconds. Bounds: 100..=60000.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// Validates configured bounds.
    pub fn validate(&self) -> CoreResult<()> {
        if !(1..=10).contains(&self.max_attempts) {
            return Err(CoreError::Config(format!(
                "retry.max_attempts must be in 1..=10, got {}",
                self.max_attempts
            )));
        }
        if !(100..=60000).contains(&self.delay_ms) {
            return Err(CoreError::Config(format!(
                "retry.delay_ms must be in 100..=60000, got {}",
                self.delay_ms
            )));
        }
        Ok(())
    }

    /// The configured delay as a [`Duration`].
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Hash pool parameters (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Target pool size the refill scheduler tops up to.
    pub max_size: u64,
    /// Maximum number of concurrent fallback (`claim_available`) callers.
    pub fallback_max_concurrent: usize,
    /// Redis key backing the pool list.
    pub pool_key: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            fallback_max_concurrent: 5,
            pool_key: "hash:pool".to_string(),
        }
    }
}

impl PoolConfig {
    /// Validates configured bounds.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_size == 0 {
            return Err(CoreError::Config("pool.max_size must be > 0".into()));
        }
        if self.fallback_max_concurrent == 0 {
            return Err(CoreError::Config(
                "pool.fallback_max_concurrent must be > 0".into(),
            ));
        }
        if self.pool_key.is_empty() {
            return Err(CoreError::Config("pool.pool_key must not be empty".into()));
        }
        Ok(())
    }
}

/// Hash generator parameters (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Number of sequence values requested per batch. Bounds: 1..=1000.
    pub batch_size: u32,
    /// Number of concurrent generation workers. Bounds: 1..=100.
    pub worker_size: usize,
    /// Bounded queue capacity before caller-runs kicks in. Bounds: 100..=100000.
    pub queue_capacity: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            worker_size: 4,
            queue_capacity: 10_000,
        }
    }
}

impl GeneratorConfig {
    /// Validates configured bounds.
    pub fn validate(&self) -> CoreResult<()> {
        if !(1..=1000).contains(&self.batch_size) {
            return Err(CoreError::Config(format!(
                "generator.batch_size must be in 1..=1000, got {}",
                self.batch_size
            )));
        }
        if !(1..=100).contains(&self.worker_size) {
            return Err(CoreError::Config(format!(
                "generator.worker_size must be in 1..=100, got {}",
                self.worker_size
            )));
        }
        if !(100..=100_000).contains(&self.queue_capacity) {
            return Err(CoreError::Config(format!(
                "generator.queue_capacity must be in 100..=100000, got {}",
                self.queue_capacity
            )));
        }
        Ok(())
    }
}

/// URL validation/normalization parameters (C13 inputs, used by C9 step 1-3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlValidationConfig {
    /// Maximum accepted URL length. Bounds: 100..=10000.
    pub max_length: usize,
    /// Scheme prefixes rejected outright during validate-raw.
    pub forbidden_schemes: Vec<String>,
}

impl Default for UrlValidationConfig {
    fn default() -> Self {
        Self {
            max_length: 2048,
            forbidden_schemes: [
                "javascript",
                "data",
                "file",
                "about",
                "vbscript",
                "mailto",
                "tel",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl UrlValidationConfig {
    /// Validates configured bounds.
    pub fn validate(&self) -> CoreResult<()> {
        if !(100..=10_000).contains(&self.max_length) {
            return Err(CoreError::Config(format!(
                "url_validation.max_length must be in 100..=10000, got {}",
                self.max_length
            )));
        }
        Ok(())
    }
}

/// URL cache TTL parameters (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default TTL, in hours, applied to both cache directions.
    pub default_ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_hours: 24,
        }
    }
}

impl CacheConfig {
    /// Validates configured bounds.
    pub fn validate(&self) -> CoreResult<()> {
        if self.default_ttl_hours == 0 {
            return Err(CoreError::Config(
                "cache.default_ttl_hours must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// The configured TTL as a [`Duration`].
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_hours * 3600)
    }
}

/// Token-bucket rate limiter parameters (C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity in tokens.
    pub capacity: u64,
    /// Tokens added per refill interval.
    pub refill_tokens: u64,
    /// Refill interval, in seconds.
    pub refill_duration_seconds: u64,
    /// Whether the limiter gate is active at all.
    pub enabled: bool,
    /// Idle expiration for a bucket key, in minutes.
    pub bucket_expiration_minutes: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_tokens: 10,
            refill_duration_seconds: 60,
            enabled: true,
            bucket_expiration_minutes: 10,
        }
    }
}

impl RateLimitConfig {
    /// Validates configured bounds.
    pub fn validate(&self) -> CoreResult<()> {
        if self.capacity == 0 {
            return Err(CoreError::Config("rate_limit.capacity must be > 0".into()));
        }
        if self.refill_duration_seconds == 0 {
            return Err(CoreError::Config(
                "rate_limit.refill_duration_seconds must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Cleaner saga parameters (C12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanerConfig {
    /// URL rows older than this many years are eligible for cleanup.
    pub retention_years: u32,
    /// Number of rows processed per saga batch.
    pub batch_size: u32,
    /// Retry policy wrapped around the paired release/delete step.
    pub retry: RetryConfig,
    /// Cron expression controlling when the cleaner runs.
    pub cron_expression: String,
    /// Minimum hold time for the `cleanOldUrls` lock.
    pub lock_at_least_for: Duration,
    /// Maximum hold time for the `cleanOldUrls` lock.
    pub lock_at_most_for: Duration,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            retention_years: 1,
            batch_size: 1000,
            retry: RetryConfig::default(),
            cron_expression: "0 0 3 * * ?".to_string(),
            lock_at_least_for: Duration::from_secs(5 * 60),
            lock_at_most_for: Duration::from_secs(60 * 60),
        }
    }
}

impl CleanerConfig {
    /// Validates configured bounds.
    pub fn validate(&self) -> CoreResult<()> {
        if self.retention_years == 0 {
            return Err(CoreError::Config(
                "cleaner.retention_years must be > 0".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(CoreError::Config("cleaner.batch_size must be > 0".into()));
        }
        self.retry.validate()?;
        if self.lock_at_least_for >= self.lock_at_most_for {
            return Err(CoreError::Config(
                "cleaner.lock_at_least_for must be < lock_at_most_for".into(),
            ));
        }
        Ok(())
    }
}

/// Pool refill scheduler parameters (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cron expression controlling refill ticks.
    pub cron_expression: String,
    /// Minimum hold time for the `generateHashBatch` lock.
    pub lock_at_least_for: Duration,
    /// Maximum hold time for the `generateHashBatch` lock.
    pub lock_at_most_for: Duration,
    /// Number of unconditional warm-up refills run at startup.
    pub startup_warmup_runs: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cron_expression: "0 * * * * ?".to_string(),
            lock_at_least_for: Duration::from_secs(30),
            lock_at_most_for: Duration::from_secs(5 * 60),
            startup_warmup_runs: 3,
        }
    }
}

impl SchedulerConfig {
    /// Validates configured bounds.
    pub fn validate(&self) -> CoreResult<()> {
        if self.lock_at_least_for >= self.lock_at_most_for {
            return Err(CoreError::Config(
                "scheduler.lock_at_least_for must be < lock_at_most_for".into(),
            ));
        }
        Ok(())
    }
}

/// Aggregate configuration for a [`crate::service::ShortenerService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL prepended to a claimed hash when building the short URL returned to callers.
    pub base_url: String,
    pub retry: RetryConfig,
    pub pool: PoolConfig,
    pub generator: GeneratorConfig,
    pub url_validation: UrlValidationConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub cleaner: CleanerConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://short.example".to_string(),
            retry: RetryConfig::default(),
            pool: PoolConfig::default(),
            generator: GeneratorConfig::default(),
            url_validation: UrlValidationConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cleaner: CleanerConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Validates every nested config, following `Default` value bounds documented on
    /// each field. Called once at service construction time; never mid-request.
    pub fn validate(&self) -> CoreResult<()> {
        if self.base_url.is_empty() {
            return Err(CoreError::Config("base_url must not be empty".into()));
        }
        self.retry.validate()?;
        self.pool.validate()?;
        self.generator.validate()?;
        self.url_validation.validate()?;
        self.cache.validate()?;
        self.rate_limit.validate()?;
        self.cleaner.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }

    /// Builds a config from environment variables, falling back to defaults for anything
    /// unset. Follows the teacher's plain-struct-with-`Default` convention rather than
    /// pulling in a dedicated configuration-framework dependency.
    pub fn from_env() -> CoreResult<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("SHORTLINK_BASE_URL") {
            config.base_url = v;
        }
        if let Ok(v) = std::env::var("SHORTLINK_POOL_MAX_SIZE") {
            config.pool.max_size = v
                .parse()
                .map_err(|_| CoreError::Config("SHORTLINK_POOL_MAX_SIZE must be a u64".into()))?;
        }
        if let Ok(v) = std::env::var("SHORTLINK_RATE_LIMIT_CAPACITY") {
            config.rate_limit.capacity = v.parse().map_err(|_| {
                CoreError::Config("SHORTLINK_RATE_LIMIT_CAPACITY must be a u64".into())
            })?;
        }
        if let Ok(v) = std::env::var("SHORTLINK_RATE_LIMIT_ENABLED") {
            config.rate_limit.enabled = v
                .parse()
                .map_err(|_| CoreError::Config("SHORTLINK_RATE_LIMIT_ENABLED must be a bool".into()))?;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        ServiceConfig::default().validate().unwrap();
    }

    #[test]
    fn retry_rejects_out_of_bounds_attempts() {
        let mut cfg = RetryConfig::default();
        cfg.max_attempts = 0;
        assert!(cfg.validate().is_err());
        cfg.max_attempts = 11;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn scheduler_rejects_inverted_lock_bounds() {
        let mut cfg = SchedulerConfig::default();
        cfg.lock_at_least_for = Duration::from_secs(600);
        cfg.lock_at_most_for = Duration::from_secs(30);
        assert!(cfg.validate().is_err());
    }
}
