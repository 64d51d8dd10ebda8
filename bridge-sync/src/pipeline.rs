//! The per-intent sync pipeline.
//!
//! ```text
//! resolve documents → clone → refresh → apply → (no-op?) → commit → push → mark outcome
//! ```
//!
//! Every step's failure skips the remaining git steps and flows into the
//! mark. [`SyncPipeline::process`] never lets an error escape unrecorded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::Instrument;

use bridge_core::{
    BranchKey, BridgeConfig, CommitIdentity, Document, Operation, PushIntent, Secret,
};
use bridge_store::IntentStore;

use crate::error::SyncError;
use crate::observer::{NoopObserver, SyncObserver};
use crate::workspace::{checked_path, CloneSpec, FileChange, Workspace};

/// Settings shared by every pipeline run.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub remote_url: String,
    /// `org/repo` of the configured remote.
    pub repo_full_name: String,
    pub default_branch: String,
    pub token: Secret,
    pub identity: CommitIdentity,
    pub clone_depth: u32,
    pub work_dir: PathBuf,
    pub dry_run: bool,
}

impl SyncSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            remote_url: config.remote_url(),
            repo_full_name: config.repo_full_name(),
            default_branch: config.github_branch.clone(),
            token: config.github_token.clone(),
            identity: config.commit_identity(),
            clone_depth: config.clone_depth,
            work_dir: config.work_dir.clone(),
            dry_run: config.dry_run,
        }
    }

    fn targets_configured_repo(&self, repo: &str) -> bool {
        repo.is_empty()
            || repo == self.repo_full_name
            || self.repo_full_name.rsplit('/').next() == Some(repo)
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Pushed { commit: String, documents: usize },
    /// The documents described state already on the branch.
    NoChanges { documents: usize },
    DryRun { documents: usize },
}

/// One async lock per `(repo, branch)`; held around the git stages.
#[derive(Default)]
struct BranchLocks {
    locks: Mutex<HashMap<BranchKey, Arc<AsyncMutex<()>>>>,
}

impl BranchLocks {
    async fn acquire(&self, key: &BranchKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Everything the blocking git stage needs, owned.
struct GitJob {
    work_dir: PathBuf,
    clone: CloneSpec,
    changes: Vec<FileChange>,
    message: String,
    identity: CommitIdentity,
}

pub struct SyncPipeline {
    store: Arc<dyn IntentStore>,
    settings: SyncSettings,
    observer: Arc<dyn SyncObserver>,
    branch_locks: BranchLocks,
}

impl SyncPipeline {
    pub fn new(store: Arc<dyn IntentStore>, settings: SyncSettings) -> Self {
        Self {
            store,
            settings,
            observer: Arc::new(NoopObserver),
            branch_locks: BranchLocks::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run the pipeline for `intent` and record the outcome on the store.
    ///
    /// A failure to record is logged and counted; it does not change the
    /// returned result, since the git side has already happened.
    pub async fn process(&self, intent: &PushIntent) -> Result<SyncOutcome, SyncError> {
        let span = tracing::info_span!("intent", intent_id = %intent.id, branch = %intent.branch);
        self.process_in_span(intent).instrument(span).await
    }

    async fn process_in_span(&self, intent: &PushIntent) -> Result<SyncOutcome, SyncError> {
        let started = Instant::now();
        self.observer.intent_started();
        tracing::info!(
            intent_id = %intent.id,
            repo = %intent.repo,
            branch = %intent.branch,
            author = %intent.author,
            "processing push intent"
        );

        let result = self.execute(intent).await;

        let error_text = result.as_ref().err().map(|err| err.to_string());
        let mark_started = Instant::now();
        let marked = self
            .store
            .mark_processed(&intent.id, error_text.as_deref())
            .await;
        self.observer.store_update_finished(mark_started.elapsed());
        if let Err(err) = marked {
            tracing::error!(intent_id = %intent.id, error = %err, "failed to mark push intent as processed");
            self.observer.error("store");
        }

        match &result {
            Ok(outcome) => {
                tracing::info!(intent_id = %intent.id, outcome = ?outcome, "push intent processed")
            }
            Err(err) => {
                tracing::error!(intent_id = %intent.id, kind = err.kind(), error = %err, "push intent failed");
                self.observer.error(err.kind());
            }
        }
        self.observer
            .intent_finished(started.elapsed(), result.is_ok());
        result
    }

    /// Run every step up to, but not including, the outcome mark.
    pub async fn execute(&self, intent: &PushIntent) -> Result<SyncOutcome, SyncError> {
        if !self.settings.targets_configured_repo(&intent.repo) {
            tracing::warn!(
                intent_id = %intent.id,
                intent_repo = %intent.repo,
                configured = %self.settings.repo_full_name,
                "intent names a different repository; using the configured remote"
            );
        }

        let documents = self.resolve(intent).await?;
        let count = documents.len();
        self.observer.documents_resolved(count);

        let changes = self.plan(intent, &documents)?;

        if self.settings.dry_run {
            for change in &changes {
                tracing::info!(intent_id = %intent.id, change = ?DryRunChange(change), "dry run: would apply");
            }
            tracing::info!(intent_id = %intent.id, documents = count, "dry run: skipping clone, commit and push");
            return Ok(SyncOutcome::DryRun { documents: count });
        }

        // Every intent lands on the configured remote, so lock on that.
        let key = BranchKey {
            repo: self.settings.repo_full_name.clone(),
            branch: intent.branch_key(&self.settings.default_branch).branch,
        };
        let job = GitJob {
            work_dir: self.settings.work_dir.clone(),
            clone: CloneSpec {
                url: self.settings.remote_url.clone(),
                branch: key.branch.clone(),
                token: (!self.settings.token.is_empty())
                    .then(|| self.settings.token.expose().to_string()),
                depth: self.settings.clone_depth,
            },
            changes,
            message: intent.message.clone(),
            identity: self.settings.identity.clone(),
        };

        let _branch = self.branch_locks.acquire(&key).await;
        let observer = Arc::clone(&self.observer);
        let span = tracing::Span::current();
        let commit = tokio::task::spawn_blocking(move || {
            span.in_scope(|| run_git(job, observer.as_ref()))
        })
        .await
        .map_err(|err| SyncError::Join(err.to_string()))??;

        match commit {
            Some(commit) => {
                tracing::info!(intent_id = %intent.id, commit = %commit, documents = count, "pushed to remote");
                Ok(SyncOutcome::Pushed {
                    commit,
                    documents: count,
                })
            }
            None => {
                tracing::info!(intent_id = %intent.id, "no changes to commit");
                self.observer.documents_skipped(count);
                Ok(SyncOutcome::NoChanges { documents: count })
            }
        }
    }

    async fn resolve(&self, intent: &PushIntent) -> Result<Vec<Document>, SyncError> {
        let started = Instant::now();
        let documents = self.store.fetch_documents(&intent.documents).await;
        self.observer.store_query_finished(started.elapsed());

        let documents = documents?;
        if documents.is_empty() {
            return Err(SyncError::NotFound {
                intent: intent.id.clone(),
            });
        }
        Ok(documents)
    }

    fn plan(&self, intent: &PushIntent, documents: &[Document]) -> Result<Vec<FileChange>, SyncError> {
        let mut changes = Vec::with_capacity(documents.len());
        for document in documents {
            checked_path(&document.path)?;
            match document.operation() {
                Operation::Create | Operation::Update => changes.push(FileChange::Write {
                    path: document.path.clone(),
                    content: document.blob.clone(),
                }),
                Operation::Delete => changes.push(FileChange::Remove {
                    path: document.path.clone(),
                }),
                Operation::Other(op) => {
                    tracing::warn!(
                        intent_id = %intent.id,
                        document_id = %document.id,
                        path = %document.path,
                        operation = %op,
                        "unknown operation; skipping document"
                    );
                    self.observer.documents_skipped(1);
                }
            }
        }
        Ok(changes)
    }
}

/// Clone, apply, commit and push. Returns the new commit, or `None` when
/// nothing changed. The workspace is removed before returning.
fn run_git(job: GitJob, observer: &dyn SyncObserver) -> Result<Option<String>, SyncError> {
    let started = Instant::now();
    let workspace = Workspace::clone_into(&job.work_dir, &job.clone)?;
    observer.clone_finished(started.elapsed());

    let result = commit_and_push(&workspace, &job, observer);
    workspace.cleanup();
    result
}

fn commit_and_push(
    workspace: &Workspace,
    job: &GitJob,
    observer: &dyn SyncObserver,
) -> Result<Option<String>, SyncError> {
    if let Err(err) = workspace.refresh() {
        tracing::warn!(error = %err, "failed to pull latest changes; continuing with fresh clone");
    }

    workspace.apply(&job.changes)?;
    if !workspace.has_staged_changes()? {
        return Ok(None);
    }

    let commit = workspace.commit(&job.message, &job.identity)?;
    tracing::info!(commit = %commit, "created commit");

    let started = Instant::now();
    workspace.push()?;
    observer.push_finished(started.elapsed());
    Ok(Some(commit.to_string()))
}

/// Log view of a change without its content.
struct DryRunChange<'a>(&'a FileChange);

impl std::fmt::Debug for DryRunChange<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            FileChange::Write { path, content } => {
                write!(f, "write {path} ({} bytes)", content.len())
            }
            FileChange::Remove { path } => write!(f, "remove {path}"),
        }
    }
}
