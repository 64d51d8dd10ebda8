mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_core::{CommitIdentity, Document, DocumentId, IntentId, PushIntent, Secret};
use bridge_store::{IntentStore, MemoryStore};
use bridge_sync::{SyncError, SyncObserver, SyncOutcome, SyncPipeline, SyncSettings};
use chrono::Utc;
use tempfile::TempDir;

use common::{is_empty_dir, Remote, WIDGET};

struct Harness {
    remote: Remote,
    work: TempDir,
    store: Arc<MemoryStore>,
}

impl Harness {
    fn new() -> Self {
        Self {
            remote: Remote::seed(),
            work: TempDir::new().expect("work dir"),
            store: Arc::new(MemoryStore::new()),
        }
    }

    fn settings(&self) -> SyncSettings {
        SyncSettings {
            remote_url: self.remote.url(),
            repo_full_name: "acme/widgets".into(),
            default_branch: "main".into(),
            token: Secret::default(),
            identity: CommitIdentity {
                name: "Virtual DOM Bot".into(),
                email: "bot@tekfly.io".into(),
            },
            // Local transports do not support shallow fetches.
            clone_depth: 0,
            work_dir: self.work.path().to_path_buf(),
            dry_run: false,
        }
    }

    fn pipeline(&self) -> SyncPipeline {
        self.pipeline_with(self.settings())
    }

    fn pipeline_with(&self, settings: SyncSettings) -> SyncPipeline {
        let store: Arc<dyn IntentStore> = self.store.clone();
        SyncPipeline::new(store, settings)
    }

    fn add_document(&self, id: &str, path: &str, blob: &[u8], operation: Option<&str>) {
        let mut metadata = BTreeMap::new();
        if let Some(op) = operation {
            metadata.insert("operation".to_string(), serde_json::json!(op));
        }
        self.store.insert_document(Document {
            id: DocumentId::from(id),
            repo: "widgets".into(),
            branch: "main".into(),
            path: path.into(),
            blob: blob.to_vec(),
            author: "ada".into(),
            version: 2,
            timestamp: Utc::now(),
            metadata,
        });
    }

    fn add_intent(&self, id: &str, documents: &[&str]) -> PushIntent {
        let intent = PushIntent {
            id: IntentId::from(id),
            repo: "widgets".into(),
            branch: "main".into(),
            author: "ada".into(),
            message: format!("Apply {id}"),
            timestamp: Utc::now(),
            processed: false,
            processed_at: None,
            error: None,
            documents: documents.iter().map(|d| DocumentId::from(*d)).collect(),
        };
        self.store.insert_intent(intent.clone());
        intent
    }

    fn stored(&self, id: &str) -> PushIntent {
        self.store.intent(&IntentId::from(id)).expect("stored intent")
    }
}

#[tokio::test]
async fn successful_run_pushes_and_marks_without_error() {
    let h = Harness::new();
    h.add_document("d1", "docs/guide.md", b"# Guide\n", Some("create"));
    let intent = h.add_intent("i-1", &["d1"]);

    let outcome = h.pipeline().process(&intent).await.expect("process");

    assert!(matches!(outcome, SyncOutcome::Pushed { documents: 1, .. }));
    assert_eq!(h.remote.head_message(), "Apply i-1");
    assert_eq!(h.remote.file_at_head("docs/guide.md").unwrap(), b"# Guide\n");

    let stored = h.stored("i-1");
    assert!(stored.processed);
    assert!(stored.processed_at.is_some());
    assert!(stored.error.is_none());
    assert!(is_empty_dir(h.work.path()), "workspace must be removed");
}

#[tokio::test]
async fn pushed_commit_uses_bot_identity() {
    let h = Harness::new();
    h.add_document("d1", "lib/widget.dart", b"class Widget { int v = 2; }\n", None);
    let intent = h.add_intent("i-1", &["d1"]);

    h.pipeline().process(&intent).await.expect("process");

    let repo = h.remote.repo();
    let head = repo
        .find_reference("refs/heads/main")
        .and_then(|r| r.peel_to_commit())
        .expect("head");
    assert_eq!(head.author().name(), Some("Virtual DOM Bot"));
    assert_eq!(head.committer().email(), Some("bot@tekfly.io"));
}

#[tokio::test]
async fn missing_documents_fail_and_record_error_without_commit() {
    let h = Harness::new();
    let intent = h.add_intent("i-stale", &["gone-1", "gone-2"]);

    let err = h.pipeline().process(&intent).await.expect_err("should fail");

    assert!(matches!(err, SyncError::NotFound { .. }));
    let stored = h.stored("i-stale");
    assert!(stored.processed);
    assert!(!stored.error.unwrap_or_default().is_empty());
    assert_eq!(h.remote.commit_count(), 1, "no commit may be pushed");
}

#[tokio::test]
async fn delete_of_absent_path_is_tolerated_and_update_is_pushed() {
    let h = Harness::new();
    h.add_document("d-del", "lib/legacy.dart", b"", Some("delete"));
    h.add_document("d-upd", "lib/widget.dart", b"class Widget { final v = 2; }\n", Some("update"));
    let intent = h.add_intent("i-mixed", &["d-del", "d-upd"]);

    let outcome = h.pipeline().process(&intent).await.expect("process");

    assert!(matches!(outcome, SyncOutcome::Pushed { documents: 2, .. }));
    assert_eq!(h.remote.commit_count(), 2);
    assert_eq!(h.remote.changed_in_head(), vec!["lib/widget.dart".to_string()]);
    assert_eq!(
        h.remote.file_at_head("lib/widget.dart").unwrap(),
        b"class Widget { final v = 2; }\n"
    );
    assert!(h.stored("i-mixed").error.is_none());
}

#[tokio::test]
async fn delete_of_tracked_path_removes_it() {
    let h = Harness::new();
    h.add_document("d-del", "README.md", b"", Some("delete"));
    let intent = h.add_intent("i-del", &["d-del"]);

    h.pipeline().process(&intent).await.expect("process");

    assert!(h.remote.file_at_head("README.md").is_none());
    assert!(h.remote.file_at_head("lib/widget.dart").is_some());
}

#[tokio::test]
async fn identical_content_is_a_successful_no_op() {
    let h = Harness::new();
    h.add_document("d1", "lib/widget.dart", WIDGET, None);
    let intent = h.add_intent("i-noop", &["d1"]);

    let outcome = h.pipeline().process(&intent).await.expect("process");

    assert_eq!(outcome, SyncOutcome::NoChanges { documents: 1 });
    assert_eq!(h.remote.commit_count(), 1);
    let stored = h.stored("i-noop");
    assert!(stored.processed);
    assert!(stored.error.is_none());
}

#[tokio::test]
async fn unknown_operation_is_skipped() {
    let h = Harness::new();
    h.add_document("d-odd", "lib/odd.dart", b"odd", Some("rename"));
    h.add_document("d-new", "lib/new.dart", b"new", Some("create"));
    let intent = h.add_intent("i-odd", &["d-odd", "d-new"]);

    h.pipeline().process(&intent).await.expect("process");

    assert_eq!(h.remote.changed_in_head(), vec!["lib/new.dart".to_string()]);
}

#[tokio::test]
async fn dry_run_marks_processed_without_touching_remote() {
    let h = Harness::new();
    h.add_document("d1", "lib/widget.dart", b"changed", None);
    let intent = h.add_intent("i-dry", &["d1"]);

    let mut settings = h.settings();
    settings.dry_run = true;
    // Unreachable remote: proves no clone is attempted.
    settings.remote_url = h.work.path().join("nowhere.git").display().to_string();

    let outcome = h.pipeline_with(settings).process(&intent).await.expect("process");

    assert_eq!(outcome, SyncOutcome::DryRun { documents: 1 });
    assert_eq!(h.remote.commit_count(), 1);
    let stored = h.stored("i-dry");
    assert!(stored.processed);
    assert!(stored.error.is_none());
}

#[tokio::test]
async fn dry_run_still_fails_on_stale_references() {
    let h = Harness::new();
    let intent = h.add_intent("i-dry-stale", &["missing"]);
    let mut settings = h.settings();
    settings.dry_run = true;

    let err = h.pipeline_with(settings).process(&intent).await.expect_err("should fail");
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn unreachable_remote_is_a_clone_error() {
    let h = Harness::new();
    h.add_document("d1", "a.txt", b"a", None);
    let intent = h.add_intent("i-clone", &["d1"]);

    let mut settings = h.settings();
    settings.remote_url = h.work.path().join("nowhere.git").display().to_string();
    let err = h.pipeline_with(settings).process(&intent).await.expect_err("should fail");

    assert!(matches!(err, SyncError::Clone { .. }));
    let recorded = h.stored("i-clone").error.expect("error recorded");
    assert!(recorded.contains("failed to clone"), "{recorded}");
}

#[tokio::test]
async fn path_escaping_the_tree_is_rejected() {
    let h = Harness::new();
    h.add_document("d1", "../outside.txt", b"x", None);
    let intent = h.add_intent("i-escape", &["d1"]);

    let err = h.pipeline().process(&intent).await.expect_err("should fail");

    assert!(matches!(err, SyncError::InvalidPath { .. }));
    assert_eq!(h.remote.commit_count(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn checked_out_symlink_cannot_redirect_writes_or_deletes() {
    let h = Harness::new();
    let outside = TempDir::new().expect("outside");
    std::fs::write(outside.path().join("victim.txt"), b"keep").expect("victim");
    h.remote.add_symlink("link", outside.path());

    h.add_document("d-write", "link/pwned.txt", b"owned", Some("create"));
    let write = h.add_intent("i-write", &["d-write"]);
    let err = h.pipeline().process(&write).await.expect_err("write must fail");
    assert!(matches!(
        err,
        SyncError::InvalidPath {
            reason: "traverses a symlink",
            ..
        }
    ));

    h.add_document("d-delete", "link/victim.txt", b"", Some("delete"));
    let delete = h.add_intent("i-delete", &["d-delete"]);
    let err = h.pipeline().process(&delete).await.expect_err("delete must fail");
    assert!(matches!(err, SyncError::InvalidPath { .. }));

    assert!(!outside.path().join("pwned.txt").exists());
    assert!(outside.path().join("victim.txt").exists());
    assert_eq!(h.remote.commit_count(), 2, "nothing pushed beyond the seed");
    assert!(h.stored("i-write").error.unwrap_or_default().contains("symlink"));
    assert!(is_empty_dir(h.work.path()));
}

#[tokio::test]
async fn documents_apply_in_intent_order() {
    let h = Harness::new();
    h.add_document("first", "notes.txt", b"first", Some("create"));
    h.add_document("second", "notes.txt", b"second", Some("update"));
    let intent = h.add_intent("i-order", &["first", "second"]);

    h.pipeline().process(&intent).await.expect("process");

    assert_eq!(h.remote.file_at_head("notes.txt").unwrap(), b"second");
}

#[tokio::test]
async fn failed_mark_does_not_change_outcome() {
    let h = Harness::new();
    h.add_document("d1", "a.txt", b"a", None);
    // Never inserted into the store, so the mark finds nothing.
    let orphan = PushIntent {
        id: IntentId::from("orphan"),
        repo: "widgets".into(),
        branch: "main".into(),
        author: "ada".into(),
        message: "orphan".into(),
        timestamp: Utc::now(),
        processed: false,
        processed_at: None,
        error: None,
        documents: vec![DocumentId::from("d1")],
    };

    let observer = Arc::new(CountingObserver::default());
    let pipeline = h.pipeline().with_observer(observer.clone());
    let outcome = pipeline.process(&orphan).await.expect("git side succeeded");

    assert!(matches!(outcome, SyncOutcome::Pushed { .. }));
    assert_eq!(observer.store_errors.load(Ordering::SeqCst), 1);
    assert_eq!(observer.clones.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.mark_calls(&IntentId::from("orphan")), 1);
}

#[tokio::test]
async fn concurrent_intents_on_same_branch_are_serialized() {
    let h = Harness::new();
    h.add_document("d1", "one.txt", b"1", None);
    h.add_document("d2", "two.txt", b"2", None);
    let first = h.add_intent("i-1", &["d1"]);
    let second = h.add_intent("i-2", &["d2"]);

    let pipeline = Arc::new(h.pipeline());
    let (a, b) = tokio::join!(pipeline.process(&first), pipeline.process(&second));
    a.expect("first");
    b.expect("second");

    assert_eq!(h.remote.commit_count(), 3);
    assert!(h.remote.file_at_head("one.txt").is_some());
    assert!(h.remote.file_at_head("two.txt").is_some());
}

#[derive(Default)]
struct CountingObserver {
    store_errors: AtomicUsize,
    clones: AtomicUsize,
}

impl SyncObserver for CountingObserver {
    fn clone_finished(&self, _elapsed: Duration) {
        self.clones.fetch_add(1, Ordering::SeqCst);
    }

    fn error(&self, kind: &str) {
        if kind == "store" {
            self.store_errors.fetch_add(1, Ordering::SeqCst);
        }
    }
}
