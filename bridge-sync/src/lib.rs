//! # bridge-sync
//!
//! Applies push intents to the remote repository.
//!
//! [`SyncPipeline::process`] resolves an intent's documents, applies them to
//! a fresh [`Workspace`], commits and pushes, then records the outcome on the
//! intent.

pub mod error;
pub mod observer;
pub mod pipeline;
pub mod workspace;

pub use error::SyncError;
pub use observer::{NoopObserver, SyncObserver};
pub use pipeline::{SyncOutcome, SyncPipeline, SyncSettings};
pub use workspace::{CloneSpec, FileChange, Workspace};
