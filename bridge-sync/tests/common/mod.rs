//! Local bare remotes for git tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use git2::{Repository, Signature};
use tempfile::TempDir;

pub const README: &[u8] = b"# widgets\n";
pub const WIDGET: &[u8] = b"class Widget {}\n";

/// A bare `acme/widgets.git` repository with one commit on `main`
/// containing `README.md` and `lib/widget.dart`.
pub struct Remote {
    pub root: TempDir,
    pub path: PathBuf,
}

impl Remote {
    pub fn seed() -> Self {
        let root = TempDir::new().expect("tempdir");
        let path = root.path().join("acme").join("widgets.git");
        let repo = Repository::init_bare(&path).expect("init bare");

        let readme = repo.blob(README).expect("blob");
        let widget = repo.blob(WIDGET).expect("blob");

        let mut lib = repo.treebuilder(None).expect("treebuilder");
        lib.insert("widget.dart", widget, 0o100644).expect("insert");
        let lib = lib.write().expect("write lib");

        let mut top = repo.treebuilder(None).expect("treebuilder");
        top.insert("README.md", readme, 0o100644).expect("insert");
        top.insert("lib", lib, 0o040000).expect("insert");
        let tree = repo.find_tree(top.write().expect("write tree")).expect("tree");

        let sig = Signature::now("Seeder", "seed@example.com").expect("sig");
        repo.commit(Some("refs/heads/main"), &sig, &sig, "initial", &tree, &[])
            .expect("commit");
        repo.set_head("refs/heads/main").expect("head");

        Self { root, path }
    }

    /// Commit a symlink `name -> target` at the top of `main`.
    pub fn add_symlink(&self, name: &str, target: &Path) {
        let repo = self.repo();
        let parent = repo
            .find_reference("refs/heads/main")
            .and_then(|r| r.peel_to_commit())
            .expect("head");
        let link = repo
            .blob(target.display().to_string().as_bytes())
            .expect("blob");
        let mut top = repo
            .treebuilder(Some(&parent.tree().expect("tree")))
            .expect("treebuilder");
        top.insert(name, link, 0o120000).expect("insert");
        let tree = repo.find_tree(top.write().expect("write tree")).expect("tree");

        let sig = Signature::now("Seeder", "seed@example.com").expect("sig");
        repo.commit(
            Some("refs/heads/main"),
            &sig,
            &sig,
            "add link",
            &tree,
            &[&parent],
        )
        .expect("commit");
    }

    /// Value for `remote_base`; the remote URL is `<base>/acme/widgets.git`.
    pub fn base(&self) -> String {
        self.root.path().display().to_string()
    }

    pub fn url(&self) -> String {
        self.path.display().to_string()
    }

    pub fn repo(&self) -> Repository {
        Repository::open_bare(&self.path).expect("open bare")
    }

    pub fn head_message(&self) -> String {
        let repo = self.repo();
        let commit = repo
            .find_reference("refs/heads/main")
            .and_then(|r| r.peel_to_commit())
            .expect("head commit");
        commit.message().unwrap_or_default().to_string()
    }

    pub fn commit_count(&self) -> usize {
        let repo = self.repo();
        let mut walk = repo.revwalk().expect("revwalk");
        walk.push_ref("refs/heads/main").expect("push ref");
        walk.count()
    }

    /// Content of `path` at the tip of `main`, if present.
    pub fn file_at_head(&self, path: &str) -> Option<Vec<u8>> {
        let repo = self.repo();
        let tree = repo
            .find_reference("refs/heads/main")
            .and_then(|r| r.peel_to_tree())
            .expect("head tree");
        let entry = tree.get_path(Path::new(path)).ok()?;
        let blob = repo.find_blob(entry.id()).ok()?;
        Some(blob.content().to_vec())
    }

    /// Paths changed by the tip commit of `main` relative to its parent.
    pub fn changed_in_head(&self) -> Vec<String> {
        let repo = self.repo();
        let head = repo
            .find_reference("refs/heads/main")
            .and_then(|r| r.peel_to_commit())
            .expect("head");
        let parent = head.parent(0).expect("parent");
        let diff = repo
            .diff_tree_to_tree(
                Some(&parent.tree().expect("tree")),
                Some(&head.tree().expect("tree")),
                None,
            )
            .expect("diff");
        diff.deltas()
            .filter_map(|d| d.new_file().path().map(|p| p.display().to_string()))
            .collect()
    }
}

pub fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
