use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::runtime::LifecycleState;

/// Error surface for the bridge runtime. Per-intent failures never reach
/// this type; they are recorded on the intent by the pipeline.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(#[from] bridge_core::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] bridge_store::StoreError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind observability server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("signal handler failed: {0}")]
    Signal(String),

    #[error("cannot {action} a bridge in state {state:?}")]
    Lifecycle {
        state: LifecycleState,
        action: &'static str,
    },

    #[error("{task} task failed: {reason}")]
    Task { task: &'static str, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
