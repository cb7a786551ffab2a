//! Hash generator (C6): batch-produces new identifiers from the monotone sequence.
//!
//! Runs on a bounded Tokio task set gated by a semaphore sized to `worker_size`, with a
//! bounded `mpsc` queue; when the queue is full the submitting task runs the batch
//! itself inline (the async analogue of a thread pool's caller-runs overflow policy).

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::codec;
use crate::config::GeneratorConfig;
use crate::error::{CoreError, CoreResult};
use crate::metrics::MetricsSink;
use crate::store::HashStore;

/// Produces one batch of fresh hashes: pulls `batch_size` sequence values from the
/// store, encodes each via Base62, checks the contract (non-empty, lengths match), and
/// persists via `insert_if_absent`.
pub async fn generate_batch(
    store: &dyn HashStore,
    config: &GeneratorConfig,
    metrics: &dyn MetricsSink,
) -> CoreResult<Vec<String>> {
    metrics.counter("hash.generation.total", &[]);

    let sequence = store.next_sequence(config.batch_size).await?;
    let encoded: Vec<String> = sequence
        .iter()
        .map(|&n| codec::encode(n))
        .collect::<CoreResult<_>>()?;

    if encoded.is_empty() || encoded.len() != sequence.len() {
        metrics.counter("hash.generation.error", &[]);
        return Err(CoreError::TransientBackend(
            "hash generation produced a mismatched or empty batch".into(),
        ));
    }

    store.insert_if_absent(&encoded).await?;
    metrics.counter("hash.generation.success", &[]);
    Ok(encoded)
}

/// Message accepted by the [`GeneratorWorkerPool`]'s bounded queue.
struct GenerateRequest;

/// Owns the bounded Tokio task set and queue described in the component design. Submit
/// with [`GeneratorWorkerPool::submit`]; fire-and-forget, errors are captured through
/// the metrics sink rather than returned to the caller.
pub struct GeneratorWorkerPool {
    sender: mpsc::Sender<GenerateRequest>,
    semaphore: Arc<Semaphore>,
    store: Arc<dyn HashStore>,
    config: GeneratorConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl GeneratorWorkerPool {
    /// Spawns `worker_size` consumer tasks draining a `queue_capacity`-bounded channel.
    pub fn new(store: Arc<dyn HashStore>, config: GeneratorConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let semaphore = Arc::new(Semaphore::new(config.worker_size));

        spawn_workers(
            receiver,
            store.clone(),
            config.clone(),
            metrics.clone(),
            semaphore.clone(),
        );

        Self {
            sender,
            semaphore,
            store,
            config,
            metrics,
        }
    }

    /// Submits a generation request. If the bounded queue is full, runs the batch
    /// inline on the caller's task instead of blocking the queue further (caller-runs
    /// overflow policy).
    pub async fn submit(&self) {
        match self.sender.try_send(GenerateRequest) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("generator queue saturated, running batch inline");
                self.run_one().await;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("generator worker pool is shut down");
            }
        }
    }

    async fn run_one(&self) {
        let _permit = self.semaphore.acquire().await;
        if let Err(err) = generate_batch(self.store.as_ref(), &self.config, self.metrics.as_ref()).await
        {
            tracing::error!(error = %err, "hash generation batch failed");
        }
    }
}

fn spawn_workers(
    mut receiver: mpsc::Receiver<GenerateRequest>,
    store: Arc<dyn HashStore>,
    config: GeneratorConfig,
    metrics: Arc<dyn MetricsSink>,
    semaphore: Arc<Semaphore>,
) {
    tokio::spawn(async move {
        while receiver.recv().await.is_some() {
            let store = store.clone();
            let config = config.clone();
            let metrics = metrics.clone();
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                if let Err(err) = generate_batch(store.as_ref(), &config, metrics.as_ref()).await {
                    tracing::error!(error = %err, "hash generation batch failed");
                }
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryHashStore;

    #[tokio::test]
    async fn generates_and_persists_a_batch() {
        let store = InMemoryHashStore::default();
        let config = GeneratorConfig {
            batch_size: 5,
            ..GeneratorConfig::default()
        };
        let metrics = crate::metrics::NullMetricsSink;

        let batch = generate_batch(&store, &config, &metrics).await.unwrap();
        assert_eq!(batch.len(), 5);

        let claimed = store.claim_available(5).await.unwrap();
        assert_eq!(claimed.len(), 5);
        for hash in claimed {
            assert!(batch.contains(&hash));
        }
    }

    #[tokio::test]
    async fn successive_batches_never_repeat_a_hash() {
        let store = InMemoryHashStore::default();
        let config = GeneratorConfig {
            batch_size: 10,
            ..GeneratorConfig::default()
        };
        let metrics = crate::metrics::NullMetricsSink;

        let first = generate_batch(&store, &config, &metrics).await.unwrap();
        let second = generate_batch(&store, &config, &metrics).await.unwrap();
        for hash in &second {
            assert!(!first.contains(hash));
        }
    }
}
