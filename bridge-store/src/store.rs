//! The store seam consumed by intake and the sync pipeline.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use bridge_core::{Document, DocumentId, IntentId, PushIntent};

use crate::error::StoreError;

pub const INTENTS_COLLECTION: &str = "push_intents";
pub const DOCUMENTS_COLLECTION: &str = "documents";

/// Live feed of newly inserted, unprocessed push intents.
///
/// An `Err` item means the feed is broken; callers drop it and watch again.
pub type IntentFeed = BoxStream<'static, Result<PushIntent, StoreError>>;

/// Typed access to the `documents` and `push_intents` collections.
///
/// Implementations are shared across the intake task and every worker, so
/// each call must be independently issuable from concurrent tasks.
#[async_trait]
pub trait IntentStore: Send + Sync + 'static {
    /// Up to `limit` unprocessed intents, oldest first.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<PushIntent>, StoreError>;

    /// Documents for `ids`, in the order of `ids`. Unknown ids are dropped.
    async fn fetch_documents(&self, ids: &[DocumentId]) -> Result<Vec<Document>, StoreError>;

    /// Set `processed`, stamp `processed_at`, and store `error` when given.
    ///
    /// `processed` is never reset by any code path.
    async fn mark_processed(&self, id: &IntentId, error: Option<&str>) -> Result<(), StoreError>;

    /// Subscribe to inserts of unprocessed intents, starting from now.
    async fn watch_pending(&self) -> Result<IntentFeed, StoreError>;

    /// Create the indexes the poll path relies on.
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Release the underlying connection.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Reorder `documents` to follow `ids`. Each document appears at most once,
/// at the position of its first id.
pub fn order_by_ids(ids: &[DocumentId], documents: Vec<Document>) -> Vec<Document> {
    let mut by_id: HashMap<DocumentId, Document> = documents
        .into_iter()
        .map(|doc| (doc.id.clone(), doc))
        .collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}
