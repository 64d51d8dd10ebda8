#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_core::{DocumentId, IntentId, PushIntent};
use bridge_daemon::{Enqueue, Intake, IntentProcessor, WorkSender};
use bridge_sync::{SyncError, SyncOutcome};
use chrono::{TimeZone, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub fn intent(id: &str, minute: u32) -> PushIntent {
    PushIntent {
        id: IntentId::from(id),
        repo: "widgets".into(),
        branch: "main".into(),
        author: "ada".into(),
        message: format!("Update {id}"),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap(),
        processed: false,
        processed_at: None,
        error: None,
        documents: vec![DocumentId::from(format!("{id}-doc"))],
    }
}

pub fn intents(count: usize) -> Vec<PushIntent> {
    (0..count)
        .map(|n| intent(&format!("i-{n}"), n as u32))
        .collect()
}

/// Enqueues a fixed list, then idles until cancelled.
pub struct FixedIntake(pub Vec<PushIntent>);

#[async_trait]
impl Intake for FixedIntake {
    fn mode(&self) -> &'static str {
        "fixed"
    }

    async fn run(&self, queue: WorkSender, cancel: CancellationToken) {
        for intent in self.0.clone() {
            if queue.enqueue(intent, &cancel).await == Enqueue::Abandoned {
                return;
            }
        }
        cancel.cancelled().await;
    }
}

/// Processor that either sleeps for a fixed time or waits on a gate.
pub struct FakeProcessor {
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl FakeProcessor {
    pub fn sleeping(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            gate: None,
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        })
    }

    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::ZERO,
            gate: Some(gate),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        })
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentProcessor for FakeProcessor {
    async fn process(&self, _intent: &PushIntent) -> Result<SyncOutcome, SyncError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        match &self.gate {
            Some(gate) => {
                let permit = gate.acquire().await.expect("gate open");
                permit.forget();
            }
            None => tokio::time::sleep(self.delay).await,
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(SyncOutcome::DryRun { documents: 1 })
    }
}

/// Poll `condition` every few milliseconds of (possibly paused) time.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
