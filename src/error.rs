//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the core funnels through [`CoreError`] so that callers
//! (and the outer retry in the creation pipeline) can match on a typed variant instead
//! of sniffing error messages.

use thiserror::Error;

/// The single error type returned by the public surface of this crate.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Input failed a validation hook or normalization step.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Resolution was attempted for a hash with no known mapping.
    #[error("hash not found")]
    NotFound,

    /// Insert collided with an existing URL; the existing hash should be returned instead.
    ///
    /// This variant is consumed internally by the creation pipeline and is not expected
    /// to escape to callers under normal operation.
    #[error("url already mapped to hash {0}")]
    UrlConflict(String),

    /// Insert collided on the hash primary key. Rare; propagated after the retry budget.
    #[error("hash collision on {0}")]
    HashCollision(String),

    /// No hash could be allocated: pool empty, fallback denied, or sequence exhausted.
    #[error("no hash available")]
    NoAvailableHash,

    /// The calling principal's token bucket was exhausted.
    #[error("rate limit exceeded")]
    RateLimited,

    /// A retryable backend fault that exhausted its retry budget without resolving.
    #[error("transient backend failure: {0}")]
    TransientBackend(String),

    /// The durable store reported an unrecoverable integrity violation.
    #[error("integrity error: {0}")]
    IntegrityError(String),

    /// A configuration value failed validation at service construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The bounded fallback-claim semaphore could not be acquired in time.
    #[error("fallback claim path is saturated")]
    Unavailable,
}

impl CoreError {
    /// Classifies whether [`crate::retry::RetryExecutor`] should retry an operation that
    /// failed with this error. Mirrors the classifier described in the component design:
    /// transient backend faults are retryable, everything else (validation, not-found,
    /// conflicts, config) is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::TransientBackend(_))
    }

    /// True for the subset of [`CoreError::IntegrityError`] the creation pipeline's outer
    /// retry is allowed to retry: integrity errors other than a URL conflict.
    pub fn is_retryable_integrity(&self) -> bool {
        matches!(self, CoreError::IntegrityError(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        classify_sqlx_error(&err)
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        CoreError::TransientBackend(err.to_string())
    }
}

/// Classifies a `sqlx::Error` into the core taxonomy.
///
/// Unique-constraint violations are distinguished by constraint name (Postgres reports
/// this reliably via `PgDatabaseError::constraint()`), never by sniffing the message --
/// see the Open Question resolution in `SPEC_FULL.md` §9.
fn classify_sqlx_error(err: &sqlx::Error) -> CoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation {
                match db_err.constraint() {
                    Some("idx_url_url_unique") => CoreError::UrlConflict(String::new()),
                    Some(c) if c.contains("hash") => CoreError::HashCollision(String::new()),
                    _ => CoreError::IntegrityError(db_err.message().to_string()),
                }
            } else {
                CoreError::IntegrityError(db_err.message().to_string())
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            CoreError::TransientBackend(err.to_string())
        }
        sqlx::Error::RowNotFound => CoreError::NotFound,
        other => CoreError::TransientBackend(other.to_string()),
    }
}

/// Convenience alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;
