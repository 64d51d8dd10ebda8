//! Domain types shared by the store, the sync pipeline and the daemon.
//!
//! Records are modelled independently of any storage encoding; the store
//! crate converts its wire records into these types at the boundary.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque identity of a push intent record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntentId(pub String);

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for IntentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for IntentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque identity of a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A `(repo, branch)` pair. Pipeline runs sharing a key touch the same remote ref.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchKey {
    pub repo: String,
    pub branch: String,
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.branch)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What a document asks the working tree to do with its path.
///
/// Read from the `operation` metadata key; absent means [`Operation::Update`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Operation {
    Create,
    #[default]
    Update,
    Delete,
    /// Anything else. Logged and skipped by the pipeline.
    Other(String),
}

impl Operation {
    pub const METADATA_KEY: &'static str = "operation";

    pub fn parse(raw: &str) -> Self {
        match raw {
            "create" => Operation::Create,
            "update" => Operation::Update,
            "delete" => Operation::Delete,
            other => Operation::Other(other.to_string()),
        }
    }

    pub fn from_metadata(metadata: &BTreeMap<String, serde_json::Value>) -> Self {
        match metadata.get(Self::METADATA_KEY) {
            Some(serde_json::Value::String(raw)) => Self::parse(raw),
            _ => Operation::Update,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
            Operation::Other(raw) => write!(f, "{raw}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A logical commit waiting to be applied to the remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushIntent {
    pub id: IntentId,
    pub repo: String,
    pub branch: String,
    pub author: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Application order is the order of this list.
    #[serde(default)]
    pub documents: Vec<DocumentId>,
}

impl PushIntent {
    pub fn is_pending(&self) -> bool {
        !self.processed
    }

    /// Branch key for this intent, falling back to `default_branch` when the
    /// record carries none.
    pub fn branch_key(&self, default_branch: &str) -> BranchKey {
        let branch = if self.branch.is_empty() {
            default_branch
        } else {
            &self.branch
        };
        BranchKey {
            repo: self.repo.clone(),
            branch: branch.to_string(),
        }
    }
}

/// A single versioned file stored independently of the intents that reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub repo: String,
    pub branch: String,
    /// Path relative to the repository root.
    pub path: String,
    pub blob: Vec<u8>,
    pub author: String,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Document {
    pub fn operation(&self) -> Operation {
        Operation::from_metadata(&self.metadata)
    }
}

/// Author and committer identity used for bot commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
