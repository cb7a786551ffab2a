//! # shortlink-core
//!
//! Identifier allocation and serving core for a URL shortening service.
//!
//! ## Architecture
//!
//! - `codec`: Base62 identifier encoding
//! - `error`: crate-wide error taxonomy
//! - `config`: typed, `Default`-backed configuration
//! - `store`: durable hash table and URL table (Postgres)
//! - `cache`: two-direction advisory URL cache (Redis)
//! - `pool`: shared FIFO of pre-allocated identifiers (Redis)
//! - `generator`: batch identifier generation
//! - `lock`: cluster-wide distributed mutual exclusion (Redis)
//! - `retry`: fixed-attempt retry executor
//! - `ratelimit`: token-bucket rate limiting
//! - `validation`: URL validation hooks and normalization
//! - `metrics`: telemetry sink abstraction
//! - `pipeline`: short URL creation
//! - `resolve`: short URL resolution
//! - `scheduler`: periodic pool refill
//! - `cleaner`: age-based cleanup saga
//! - `service`: the assembled caller-facing facade

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod cleaner;
pub mod codec;
pub mod config;
pub mod error;
pub mod generator;
pub mod lock;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod ratelimit;
pub mod resolve;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod validation;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{CoreError, CoreResult};
pub use service::{ServiceDeps, ShortenerService};

/// Crate version, re-exported for embedders that want to tag logs/metrics with it.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, re-exported for embedders that want to tag logs/metrics with it.
pub const NAME: &str = env!("CARGO_PKG_NAME");
