//! Error types for bridge-sync.

use std::path::PathBuf;

use thiserror::Error;

use bridge_core::IntentId;
use bridge_store::StoreError;

/// Every way a single pipeline run can fail. None of these escape the
/// pipeline boundary; each is recorded on the intent.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The intent referenced documents but none resolved.
    #[error("no documents found for push intent {intent}")]
    NotFound { intent: IntentId },

    /// Network or authentication failure while cloning.
    #[error("failed to clone {url} (branch {branch}): {source}")]
    Clone {
        url: String,
        branch: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to commit: {0}")]
    Commit(String),

    #[error("failed to push {branch}: {message}")]
    Push { branch: String, message: String },

    /// A document path that would escape the working tree.
    #[error("invalid document path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Writing, removing or staging a document failed.
    #[error("failed to apply {path}: {reason}")]
    Apply { path: String, reason: String },

    /// Any other git operation on the workspace.
    #[error("git {op} failed: {source}")]
    Git {
        op: &'static str,
        #[source]
        source: git2::Error,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The blocking git task panicked or was cancelled.
    #[error("git task failed: {0}")]
    Join(String),
}

impl SyncError {
    /// Stable label, used as the `type` of the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::NotFound { .. } => "not_found",
            SyncError::Clone { .. } => "clone",
            SyncError::Commit(_) => "commit",
            SyncError::Push { .. } => "push",
            SyncError::InvalidPath { .. } | SyncError::Apply { .. } => "apply",
            SyncError::Git { .. } | SyncError::Io { .. } => "workspace",
            SyncError::Store(_) => "store",
            SyncError::Join(_) => "join",
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn git_err(op: &'static str) -> impl FnOnce(git2::Error) -> SyncError {
    move |source| SyncError::Git { op, source }
}
