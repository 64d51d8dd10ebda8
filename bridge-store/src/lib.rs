//! Bridge store — typed access to push intents and documents.
//!
//! - [`store`] — the [`IntentStore`] seam
//! - [`mongo`] — [`MongoStore`], backed by MongoDB
//! - [`memory`] — [`MemoryStore`], in-process
//! - [`record`] — BSON record decoding

pub mod error;
pub mod memory;
pub mod mongo;
pub mod record;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use store::{order_by_ids, IntentFeed, IntentStore, DOCUMENTS_COLLECTION, INTENTS_COLLECTION};
