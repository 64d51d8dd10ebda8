//! Error types for bridge-core.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration failures. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is missing or empty.
    #[error("{key} is required")]
    Missing { key: &'static str },

    /// A setting could not be parsed into its expected type.
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// A setting parsed but violates a constraint.
    #[error("{0}")]
    Constraint(String),

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML for [`crate::config::FileConfig`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
