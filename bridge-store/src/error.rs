//! Error types for bridge-store.

use bridge_core::IntentId;
use thiserror::Error;

/// Failures talking to the intent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not establish or verify the connection. Fatal at startup.
    #[error("failed to connect to store: {0}")]
    Connect(String),

    /// A query or update was rejected or the transport failed.
    #[error("{op} on {collection} failed: {source}")]
    Query {
        op: &'static str,
        collection: &'static str,
        #[source]
        source: mongodb::error::Error,
    },

    /// A stored record does not have the expected shape.
    #[error("failed to decode {collection} record: {reason}")]
    Decode {
        collection: &'static str,
        reason: String,
    },

    /// `mark_processed` matched no record.
    #[error("push intent not found: {0}")]
    IntentNotFound(IntentId),

    /// The live change feed broke. Intake reconnects after a delay.
    #[error("change feed error: {0}")]
    Feed(String),
}

pub(crate) fn query_err(
    op: &'static str,
    collection: &'static str,
) -> impl FnOnce(mongodb::error::Error) -> StoreError {
    move |source| StoreError::Query {
        op,
        collection,
        source,
    }
}
