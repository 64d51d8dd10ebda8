//! Bounded work queue between intake and the worker pool.
//!
//! The queue keeps an in-flight lease per intent id. An intent is leased
//! when it is enqueued and released when the worker holding it drops its
//! [`Job`], so an intent still queued or mid-pipeline is never queued twice.
//!
//! There is exactly one [`WorkSender`]. The queue closes when it is dropped,
//! which the runtime only lets happen once intake has returned.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bridge_core::{IntentId, PushIntent};

use crate::metrics::BridgeMetrics;

/// Result of one enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Enqueued,
    /// The intent is already queued or being processed.
    AlreadyInFlight,
    /// Cancellation fired, or the queue is closed. Intake should return.
    Abandoned,
}

#[derive(Clone, Default)]
struct Leases(Arc<Mutex<HashSet<IntentId>>>);

impl Leases {
    fn lock(&self) -> MutexGuard<'_, HashSet<IntentId>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, id: &IntentId) -> bool {
        self.lock().insert(id.clone())
    }

    fn release(&self, id: &IntentId) {
        self.lock().remove(id);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Create a queue holding at most `capacity` intents.
pub fn work_queue(capacity: usize, metrics: BridgeMetrics) -> (WorkSender, WorkReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let leases = Leases::default();
    (
        WorkSender {
            tx,
            leases: leases.clone(),
            metrics: metrics.clone(),
        },
        WorkReceiver {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            leases,
            metrics,
        },
    )
}

pub struct WorkSender {
    tx: mpsc::Sender<PushIntent>,
    leases: Leases,
    metrics: BridgeMetrics,
}

impl WorkSender {
    /// Enqueue `intent`, waiting while the queue is full.
    ///
    /// Returns [`Enqueue::Abandoned`] without blocking further once `cancel`
    /// fires.
    pub async fn enqueue(&self, intent: PushIntent, cancel: &CancellationToken) -> Enqueue {
        if cancel.is_cancelled() {
            return Enqueue::Abandoned;
        }
        let id = intent.id.clone();
        if !self.leases.claim(&id) {
            return Enqueue::AlreadyInFlight;
        }

        // Counted before the send so a worker's dequeue never sees it first.
        self.metrics.queue_size.inc();
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = self.tx.send(intent) => sent.is_ok(),
        };
        if sent {
            Enqueue::Enqueued
        } else {
            self.metrics.queue_size.dec();
            self.leases.release(&id);
            Enqueue::Abandoned
        }
    }

    /// Number of intents queued or being processed.
    pub fn in_flight(&self) -> usize {
        self.leases.len()
    }
}

/// Shared consumer side; every worker holds a clone.
#[derive(Clone)]
pub struct WorkReceiver {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PushIntent>>>,
    leases: Leases,
    metrics: BridgeMetrics,
}

impl WorkReceiver {
    /// Next intent, or `None` once `cancel` fires or the queue is closed and
    /// drained. Cancellation wins over a ready item.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<Job> {
        if cancel.is_cancelled() {
            return None;
        }
        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            rx = self.rx.lock() => rx,
        };
        let intent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            intent = rx.recv() => intent?,
        };
        drop(rx);

        self.metrics.queue_size.dec();
        Some(Job {
            intent,
            leases: self.leases.clone(),
        })
    }
}

/// A dequeued intent. Dropping it releases the intent's lease.
pub struct Job {
    intent: PushIntent,
    leases: Leases,
}

impl Job {
    pub fn intent(&self) -> &PushIntent {
        &self.intent
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        self.leases.release(&self.intent.id);
    }
}
