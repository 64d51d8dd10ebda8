//! Side-effect sink for pipeline measurements.
//!
//! The daemon implements this with its metrics registry; tests and
//! one-shot callers use [`NoopObserver`].

use std::time::Duration;

/// Every method defaults to doing nothing.
pub trait SyncObserver: Send + Sync + 'static {
    /// A pipeline run began.
    fn intent_started(&self) {}

    /// A pipeline run ended, outcome recorded or not.
    fn intent_finished(&self, _elapsed: Duration, _succeeded: bool) {}

    fn documents_resolved(&self, _count: usize) {}

    /// Documents that produced no commit: unknown operations, or a no-op run.
    fn documents_skipped(&self, _count: usize) {}

    fn clone_finished(&self, _elapsed: Duration) {}

    fn push_finished(&self, _elapsed: Duration) {}

    fn store_query_finished(&self, _elapsed: Duration) {}

    fn store_update_finished(&self, _elapsed: Duration) {}

    /// Count one error under `kind`.
    fn error(&self, _kind: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}
