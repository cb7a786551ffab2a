//! Metrics sink abstraction (C18).
//!
//! The core never binds to a specific telemetry backend -- that wiring belongs to the
//! embedder per the scope notes in `SPEC_FULL.md` §1. [`TracingMetricsSink`] is a
//! dependency-free default that routes every counter/gauge/timing through `tracing`,
//! which is sufficient for this crate's own tests and for embedders that ship their own
//! `tracing` subscriber -> metrics bridge.

use std::sync::Arc;
use std::time::Duration;

/// Low-cardinality tag list attached to a metric emission.
pub type Tags<'a> = &'a [(&'a str, &'a str)];

/// Counters, gauges, and timers identified by name and tags.
///
/// Names referenced by the core (non-exhaustive, see `SPEC_FULL.md` §6):
/// `hash.pool.size`, `hash.cache.{hit,miss,fallback,return}`,
/// `hash.generation.{total,success,error,on_the_fly,duration}`,
/// `url.creation.{total,success,failure,duration}`,
/// `url.redirect.{total,success,not_found,duration}`, `url.cache.{hit,miss}`,
/// `url.conflict`, `url.validation.failure`, `redirect.validation.failure`,
/// `rate.limit.exceeded`.
pub trait MetricsSink: Send + Sync {
    /// Increments a counter by one.
    fn counter(&self, name: &str, tags: Tags<'_>);

    /// Records an absolute gauge value.
    fn gauge(&self, name: &str, value: f64, tags: Tags<'_>);

    /// Records a duration against a named timer.
    fn timing(&self, name: &str, duration: Duration, tags: Tags<'_>);
}

/// A [`MetricsSink`] that logs every emission through `tracing` at `debug` level.
///
/// This is the default wired up by [`crate::service::ShortenerService`] when no sink is
/// supplied; a production embedder substitutes a Prometheus/StatsD-backed
/// implementation without the core needing to know about it.
#[derive(Debug, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn counter(&self, name: &str, tags: Tags<'_>) {
        tracing::debug!(metric = name, ?tags, kind = "counter", "metric emitted");
    }

    fn gauge(&self, name: &str, value: f64, tags: Tags<'_>) {
        tracing::debug!(metric = name, value, ?tags, kind = "gauge", "metric emitted");
    }

    fn timing(&self, name: &str, duration: Duration, tags: Tags<'_>) {
        tracing::debug!(
            metric = name,
            duration_ms = duration.as_millis() as u64,
            ?tags,
            kind = "timing",
            "metric emitted"
        );
    }
}

/// A no-op sink used in tests where metric emission is irrelevant to the assertion.
#[derive(Debug, Default)]
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn counter(&self, _name: &str, _tags: Tags<'_>) {}
    fn gauge(&self, _name: &str, _value: f64, _tags: Tags<'_>) {}
    fn timing(&self, _name: &str, _duration: Duration, _tags: Tags<'_>) {}
}

/// Shared handle type used everywhere a component needs to emit metrics.
pub type SharedMetrics = Arc<dyn MetricsSink>;
