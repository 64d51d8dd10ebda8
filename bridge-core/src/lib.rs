//! Bridge core library — domain types, configuration, errors.
//!
//! - [`types`] — push intents, documents, ids
//! - [`config`] — layered [`BridgeConfig`]
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{BridgeConfig, FileConfig, LogFormat, Secret};
pub use error::ConfigError;
pub use types::{
    BranchKey, CommitIdentity, Document, DocumentId, IntentId, Operation, PushIntent,
};
