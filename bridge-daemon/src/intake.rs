//! Intake strategies: discover pending push intents and enqueue them.
//!
//! Exactly one [`Intake`] runs per process. Both variants return once the
//! cancellation token fires, dropping their [`WorkSender`] and so closing
//! the queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use bridge_core::PushIntent;
use bridge_store::IntentStore;
use bridge_sync::SyncObserver;

use crate::metrics::BridgeMetrics;
use crate::queue::{Enqueue, WorkSender};

#[async_trait]
pub trait Intake: Send + Sync + 'static {
    /// Short name for logs.
    fn mode(&self) -> &'static str;

    /// Produce intents onto `queue` until `cancel` fires.
    async fn run(&self, queue: WorkSender, cancel: CancellationToken);
}

/// Periodic bulk fetch of unprocessed intents, oldest first.
///
/// Leases are claimed at enqueue, after the fetch. An intent whose run
/// finishes and releases its lease between a tick's fetch and that tick's
/// claim is queued once more; delivery is at-least-once.
pub struct PollIntake {
    store: Arc<dyn IntentStore>,
    interval: Duration,
    batch_size: usize,
    metrics: BridgeMetrics,
}

impl PollIntake {
    pub fn new(
        store: Arc<dyn IntentStore>,
        interval: Duration,
        batch_size: usize,
        metrics: BridgeMetrics,
    ) -> Self {
        Self {
            store,
            interval,
            batch_size,
            metrics,
        }
    }
}

#[async_trait]
impl Intake for PollIntake {
    fn mode(&self) -> &'static str {
        "poll"
    }

    async fn run(&self, queue: WorkSender, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "starting poll intake"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            let fetched = self.store.fetch_pending(self.batch_size).await;
            self.metrics.store_query_finished(started.elapsed());

            let intents = match fetched {
                Ok(intents) => intents,
                Err(err) => {
                    tracing::error!(error = %err, "failed to fetch pending push intents");
                    self.metrics.error("polling");
                    continue;
                }
            };
            if !intents.is_empty() {
                tracing::debug!(count = intents.len(), "fetched pending push intents");
            }
            if !enqueue_all(&queue, intents, &cancel).await {
                break;
            }
        }
        tracing::info!("poll intake stopped");
    }
}

/// Live feed of inserted, unprocessed intents. Reconnects after a fixed
/// delay whenever the feed fails or ends.
///
/// A reconnect starts watching from "now", so inserts during the gap are
/// not seen by this intake.
pub struct FeedIntake {
    store: Arc<dyn IntentStore>,
    reconnect_delay: Duration,
    metrics: BridgeMetrics,
}

impl FeedIntake {
    pub fn new(store: Arc<dyn IntentStore>, reconnect_delay: Duration, metrics: BridgeMetrics) -> Self {
        Self {
            store,
            reconnect_delay,
            metrics,
        }
    }

    /// Drain one feed subscription. Returns `false` when intake should stop.
    async fn follow(&self, queue: &WorkSender, cancel: &CancellationToken) -> bool {
        let mut feed = match self.store.watch_pending().await {
            Ok(feed) => feed,
            Err(err) => {
                tracing::error!(error = %err, "failed to open change feed");
                self.metrics.error("changestream");
                return true;
            }
        };
        tracing::info!("watching push intents");

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                item = feed.next() => item,
            };
            match item {
                Some(Ok(intent)) => {
                    if !enqueue_all(queue, vec![intent], cancel).await {
                        return false;
                    }
                }
                Some(Err(err)) => {
                    tracing::error!(error = %err, "change feed error");
                    self.metrics.error("changestream");
                    return true;
                }
                None => {
                    tracing::warn!("change feed ended");
                    return true;
                }
            }
        }
    }
}

#[async_trait]
impl Intake for FeedIntake {
    fn mode(&self) -> &'static str {
        "feed"
    }

    async fn run(&self, queue: WorkSender, cancel: CancellationToken) {
        tracing::info!("starting feed intake");
        while self.follow(&queue, &cancel).await {
            tracing::info!(
                delay_secs = self.reconnect_delay.as_secs(),
                "reconnecting change feed"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        tracing::info!("feed intake stopped");
    }
}

/// Enqueue in order. Returns `false` once an attempt is abandoned.
async fn enqueue_all(queue: &WorkSender, intents: Vec<PushIntent>, cancel: &CancellationToken) -> bool {
    for intent in intents {
        let id = intent.id.clone();
        match queue.enqueue(intent, cancel).await {
            Enqueue::Enqueued => tracing::debug!(intent_id = %id, "queued push intent"),
            Enqueue::AlreadyInFlight => {
                tracing::debug!(intent_id = %id, "push intent already in flight; skipping")
            }
            Enqueue::Abandoned => return false,
        }
    }
    true
}
