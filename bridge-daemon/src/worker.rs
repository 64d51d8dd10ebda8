//! Worker pool draining the work queue.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use bridge_core::PushIntent;
use bridge_sync::{SyncError, SyncOutcome, SyncPipeline};

use crate::metrics::BridgeMetrics;
use crate::queue::WorkReceiver;

/// Runs one intent to completion, outcome recorded.
#[async_trait]
pub trait IntentProcessor: Send + Sync + 'static {
    async fn process(&self, intent: &PushIntent) -> Result<SyncOutcome, SyncError>;
}

#[async_trait]
impl IntentProcessor for SyncPipeline {
    async fn process(&self, intent: &PushIntent) -> Result<SyncOutcome, SyncError> {
        SyncPipeline::process(self, intent).await
    }
}

/// Spawn `count` workers onto `workers`.
pub fn spawn_workers(
    workers: &mut JoinSet<()>,
    count: usize,
    queue: WorkReceiver,
    processor: Arc<dyn IntentProcessor>,
    metrics: BridgeMetrics,
    cancel: CancellationToken,
) {
    for worker_id in 0..count {
        workers.spawn(worker_loop(
            worker_id,
            queue.clone(),
            Arc::clone(&processor),
            metrics.clone(),
            cancel.clone(),
        ));
    }
}

/// Pull and process intents one at a time until cancelled or the queue is
/// closed. A run that is already under way is never interrupted.
async fn worker_loop(
    worker_id: usize,
    queue: WorkReceiver,
    processor: Arc<dyn IntentProcessor>,
    metrics: BridgeMetrics,
    cancel: CancellationToken,
) {
    metrics.active_workers.inc();
    tracing::debug!(worker_id, "worker started");

    while let Some(job) = queue.next(&cancel).await {
        let intent = job.intent();
        // Failures are logged and recorded on the intent by the processor.
        if let Err(err) = processor.process(intent).await {
            tracing::debug!(worker_id, intent_id = %intent.id, kind = err.kind(), "worker finished failed intent");
        }
        drop(job);
    }

    metrics.active_workers.dec();
    tracing::debug!(worker_id, "worker stopped");
}
