//! In-process [`IntentStore`] used by tests and dry local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use bridge_core::{Document, DocumentId, IntentId, PushIntent};

use crate::error::StoreError;
use crate::store::{order_by_ids, IntentFeed, IntentStore};

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
enum FeedEvent {
    Insert(PushIntent),
    Fail(String),
}

#[derive(Default)]
struct State {
    intents: Vec<PushIntent>,
    documents: HashMap<DocumentId, Document>,
    mark_calls: HashMap<IntentId, usize>,
}

pub struct MemoryStore {
    state: Mutex<State>,
    feed: broadcast::Sender<FeedEvent>,
    watches: AtomicUsize,
    fail_next_watch: AtomicBool,
    fail_next_fetch: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            feed,
            watches: AtomicUsize::new(0),
            fail_next_watch: AtomicBool::new(false),
            fail_next_fetch: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_document(&self, document: Document) {
        self.state().documents.insert(document.id.clone(), document);
    }

    /// Store an intent and announce it to every open feed.
    pub fn insert_intent(&self, intent: PushIntent) {
        self.state().intents.push(intent.clone());
        // No subscribers is fine; poll intake still sees the record.
        let _ = self.feed.send(FeedEvent::Insert(intent));
    }

    pub fn intent(&self, id: &IntentId) -> Option<PushIntent> {
        self.state().intents.iter().find(|i| &i.id == id).cloned()
    }

    pub fn intents(&self) -> Vec<PushIntent> {
        self.state().intents.clone()
    }

    /// Number of `mark_processed` calls that targeted `id`.
    pub fn mark_calls(&self, id: &IntentId) -> usize {
        self.state().mark_calls.get(id).copied().unwrap_or(0)
    }

    /// Break every open feed with `message`.
    pub fn break_feed(&self, message: &str) {
        let _ = self.feed.send(FeedEvent::Fail(message.to_string()));
    }

    /// Make the next `watch_pending` call fail.
    pub fn fail_next_watch(&self) {
        self.fail_next_watch.store(true, Ordering::SeqCst);
    }

    /// Make the next `fetch_pending` call fail as if the connection dropped.
    pub fn fail_next_fetch(&self) {
        self.fail_next_fetch.store(true, Ordering::SeqCst);
    }

    /// Number of `watch_pending` calls so far, failed ones included.
    pub fn watch_count(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentStore for MemoryStore {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<PushIntent>, StoreError> {
        if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Connect("store connection lost".to_string()));
        }
        let mut pending: Vec<PushIntent> = self
            .state()
            .intents
            .iter()
            .filter(|i| i.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|i| i.timestamp);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn fetch_documents(&self, ids: &[DocumentId]) -> Result<Vec<Document>, StoreError> {
        let state = self.state();
        let found = ids
            .iter()
            .filter_map(|id| state.documents.get(id).cloned())
            .collect();
        Ok(order_by_ids(ids, found))
    }

    async fn mark_processed(&self, id: &IntentId, error: Option<&str>) -> Result<(), StoreError> {
        let mut state = self.state();
        *state.mark_calls.entry(id.clone()).or_default() += 1;

        let intent = state
            .intents
            .iter_mut()
            .find(|i| &i.id == id)
            .ok_or_else(|| StoreError::IntentNotFound(id.clone()))?;
        intent.processed = true;
        intent.processed_at = Some(Utc::now());
        if let Some(message) = error {
            intent.error = Some(message.to_string());
        }
        Ok(())
    }

    async fn watch_pending(&self) -> Result<IntentFeed, StoreError> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_watch.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Feed("change streams unavailable".to_string()));
        }

        let feed = BroadcastStream::new(self.feed.subscribe()).filter_map(|event| async move {
            match event {
                Ok(FeedEvent::Insert(intent)) if intent.is_pending() => Some(Ok(intent)),
                Ok(FeedEvent::Insert(_)) => None,
                Ok(FeedEvent::Fail(message)) => Some(Err(StoreError::Feed(message))),
                Err(lagged) => {
                    tracing::warn!(error = %lagged, "in-memory feed lagged");
                    None
                }
            }
        });
        Ok(feed.boxed())
    }
}
