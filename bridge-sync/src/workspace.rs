//! Ephemeral checkouts of the remote branch.
//!
//! A [`Workspace`] owns its temporary directory. Dropping it, or calling
//! [`Workspace::cleanup`], removes the directory on every exit path.
//!
//! All operations here are blocking; the pipeline runs them on the blocking
//! thread pool.

use std::fs;
use std::path::{Component, Path, PathBuf};

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Cred, FetchOptions, Oid, PushOptions, RemoteCallbacks, Repository, Signature,
};
use tempfile::TempDir;

use bridge_core::CommitIdentity;

use crate::error::{git_err, io_err, SyncError};

const REMOTE: &str = "origin";

/// What to clone.
#[derive(Debug, Clone)]
pub struct CloneSpec {
    pub url: String,
    pub branch: String,
    /// Bearer token sent as the HTTPS password. `None` for unauthenticated remotes.
    pub token: Option<String>,
    /// History depth; `0` clones the full history.
    pub depth: u32,
}

/// One change to the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Write { path: String, content: Vec<u8> },
    Remove { path: String },
}

impl FileChange {
    pub fn path(&self) -> &str {
        match self {
            FileChange::Write { path, .. } | FileChange::Remove { path } => path,
        }
    }
}

pub struct Workspace {
    // Declared before `dir` so the handle closes before the directory goes.
    repo: Repository,
    dir: TempDir,
    branch: String,
    token: Option<String>,
    depth: u32,
}

impl Workspace {
    /// Single-branch clone of `spec.branch` into a fresh directory under `parent`.
    pub fn clone_into(parent: &Path, spec: &CloneSpec) -> Result<Self, SyncError> {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        let dir = tempfile::Builder::new()
            .prefix("sync-")
            .tempdir_in(parent)
            .map_err(|e| io_err(parent, e))?;

        let fetch = fetch_options(spec.token.clone(), spec.depth);
        let fetch_refspec = tracking_refspec(&spec.branch);

        let mut builder = RepoBuilder::new();
        builder
            .branch(&spec.branch)
            .fetch_options(fetch)
            .remote_create(move |repo, name, url| repo.remote_with_fetch(name, url, &fetch_refspec));

        let repo = builder
            .clone(&spec.url, dir.path())
            .map_err(|source| SyncError::Clone {
                url: spec.url.clone(),
                branch: spec.branch.clone(),
                source,
            })?;

        tracing::debug!(path = %dir.path().display(), branch = %spec.branch, "cloned workspace");
        Ok(Self {
            repo,
            dir,
            branch: spec.branch.clone(),
            token: spec.token.clone(),
            depth: spec.depth,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Fetch the branch again and fast-forward onto it.
    pub fn refresh(&self) -> Result<(), SyncError> {
        let mut remote = self.repo.find_remote(REMOTE).map_err(git_err("fetch"))?;
        let mut fetch = fetch_options(self.token.clone(), self.depth);
        let refspec = tracking_refspec(&self.branch);
        remote
            .fetch(&[refspec.as_str()], Some(&mut fetch), None)
            .map_err(git_err("fetch"))?;

        let tracking = format!("refs/remotes/{REMOTE}/{}", self.branch);
        let upstream = self
            .repo
            .find_reference(&tracking)
            .map_err(git_err("fetch"))?;
        let upstream = self
            .repo
            .reference_to_annotated_commit(&upstream)
            .map_err(git_err("fetch"))?;

        let (analysis, _) = self
            .repo
            .merge_analysis(&[&upstream])
            .map_err(git_err("merge analysis"))?;
        if analysis.is_up_to_date() {
            return Ok(());
        }
        if !analysis.is_fast_forward() {
            return Err(SyncError::Git {
                op: "fast-forward",
                source: git2::Error::from_str("local branch diverged from remote"),
            });
        }

        let local = format!("refs/heads/{}", self.branch);
        let mut reference = self.repo.find_reference(&local).map_err(git_err("fast-forward"))?;
        reference
            .set_target(upstream.id(), "fast-forward")
            .map_err(git_err("fast-forward"))?;
        self.repo.set_head(&local).map_err(git_err("fast-forward"))?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::default().force()))
            .map_err(git_err("checkout"))?;
        Ok(())
    }

    /// Apply `changes` in order and stage them.
    ///
    /// Removing a path that does not exist is not an error.
    pub fn apply(&self, changes: &[FileChange]) -> Result<(), SyncError> {
        let mut index = self.repo.index().map_err(git_err("index"))?;

        for change in changes {
            let relative = checked_path(change.path())?;
            let write = matches!(change, FileChange::Write { .. });
            reject_symlinks(self.path(), &relative, write, change.path())?;
            let full = self.path().join(&relative);
            let apply_err = |reason: String| SyncError::Apply {
                path: change.path().to_string(),
                reason,
            };

            match change {
                FileChange::Write { content, .. } => {
                    if let Some(parent) = full.parent() {
                        fs::create_dir_all(parent).map_err(|e| apply_err(e.to_string()))?;
                    }
                    fs::write(&full, content).map_err(|e| apply_err(e.to_string()))?;
                    index
                        .add_path(&relative)
                        .map_err(|e| apply_err(e.message().to_string()))?;
                }
                FileChange::Remove { .. } => {
                    let present = fs::symlink_metadata(&full)
                        .map(|meta| !meta.is_dir())
                        .unwrap_or(false);
                    if present {
                        fs::remove_file(&full).map_err(|e| apply_err(e.to_string()))?;
                    }
                    if index.get_path(&relative, 0).is_some() {
                        index
                            .remove_path(&relative)
                            .map_err(|e| apply_err(e.message().to_string()))?;
                    }
                }
            }
        }

        index.write().map_err(git_err("index write"))?;
        Ok(())
    }

    /// Whether the index differs from `HEAD`.
    pub fn has_staged_changes(&self) -> Result<bool, SyncError> {
        let head = self
            .repo
            .head()
            .and_then(|h| h.peel_to_tree())
            .map_err(git_err("status"))?;
        let index = self.repo.index().map_err(git_err("status"))?;
        let diff = self
            .repo
            .diff_tree_to_index(Some(&head), Some(&index), None)
            .map_err(git_err("status"))?;
        Ok(diff.deltas().len() > 0)
    }

    /// Commit the index on top of `HEAD`.
    pub fn commit(&self, message: &str, identity: &CommitIdentity) -> Result<Oid, SyncError> {
        let commit_err = |e: git2::Error| SyncError::Commit(e.message().to_string());

        let mut index = self.repo.index().map_err(commit_err)?;
        let tree_id = index.write_tree().map_err(commit_err)?;
        let parent = self
            .repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(commit_err)?;
        if parent.tree_id() == tree_id {
            return Err(SyncError::Commit("nothing staged to commit".to_string()));
        }

        let tree = self.repo.find_tree(tree_id).map_err(commit_err)?;
        let signature = Signature::now(&identity.name, &identity.email).map_err(commit_err)?;
        self.repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &[&parent])
            .map_err(commit_err)
    }

    /// Push the local branch to the same branch on the remote.
    pub fn push(&self) -> Result<(), SyncError> {
        let push_err = |message: String| SyncError::Push {
            branch: self.branch.clone(),
            message,
        };

        let mut remote = self
            .repo
            .find_remote(REMOTE)
            .map_err(|e| push_err(e.message().to_string()))?;
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", self.branch);

        let mut rejection: Option<String> = None;
        {
            let mut callbacks = remote_callbacks(self.token.clone());
            callbacks.push_update_reference(|_name, status| {
                if let Some(message) = status {
                    rejection = Some(message.to_string());
                }
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);

            remote
                .push(&[refspec.as_str()], Some(&mut options))
                .map_err(|e| push_err(e.message().to_string()))?;
        }

        match rejection {
            Some(message) => Err(push_err(format!("remote rejected update: {message}"))),
            None => Ok(()),
        }
    }

    /// Close the repository and remove the directory.
    pub fn cleanup(self) {
        let Workspace { repo, dir, .. } = self;
        drop(repo);
        let path = dir.path().to_path_buf();
        if let Err(err) = dir.close() {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove workspace");
        }
    }
}

fn tracking_refspec(branch: &str) -> String {
    format!("+refs/heads/{branch}:refs/remotes/{REMOTE}/{branch}")
}

fn remote_callbacks(token: Option<String>) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(token) = token {
        let mut attempted = false;
        callbacks.credentials(move |_url, _username, _allowed| {
            // libgit2 re-invokes the callback after a rejected credential.
            if attempted {
                return Err(git2::Error::from_str("token rejected by remote"));
            }
            attempted = true;
            Cred::userpass_plaintext("x-access-token", &token)
        });
    }
    callbacks
}

fn fetch_options(token: Option<String>, depth: u32) -> FetchOptions<'static> {
    let mut fetch = FetchOptions::new();
    fetch.remote_callbacks(remote_callbacks(token));
    if depth > 0 {
        fetch.depth(i32::try_from(depth).unwrap_or(i32::MAX));
    }
    fetch
}

/// Validate a document path and return it relative to the working tree root.
pub fn checked_path(raw: &str) -> Result<PathBuf, SyncError> {
    let invalid = |reason| SyncError::InvalidPath {
        path: raw.to_string(),
        reason,
    };

    let mut relative = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => {
                if relative.as_os_str().is_empty() && part == ".git" {
                    return Err(invalid("targets the .git directory"));
                }
                relative.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("contains '..'")),
            Component::RootDir | Component::Prefix(_) => return Err(invalid("is absolute")),
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(invalid("is empty"));
    }
    Ok(relative)
}

/// Fail if any directory on the way to `relative` is a symlink, or, when
/// `include_leaf` is set, if the target itself is one. Checked-out symlinks
/// come from the remote and may point anywhere on the host.
fn reject_symlinks(
    root: &Path,
    relative: &Path,
    include_leaf: bool,
    raw: &str,
) -> Result<(), SyncError> {
    let components: Vec<_> = relative.components().collect();
    let checked = if include_leaf {
        components.len()
    } else {
        components.len().saturating_sub(1)
    };

    let mut current = root.to_path_buf();
    for component in components.into_iter().take(checked) {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(SyncError::InvalidPath {
                    path: raw.to_string(),
                    reason: "traverses a symlink",
                })
            }
            Ok(_) => {}
            // Nothing below a missing entry can exist yet.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => break,
            Err(err) => return Err(io_err(current.clone(), err)),
        }
    }
    Ok(())
}
