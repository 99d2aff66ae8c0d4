//! A repository over a virtual filesystem subtree: object database, refs,
//! and the history queries the anchoring pipeline consumes.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anchorgit_vfs::Fs;

use crate::object::{Commit, ObjectId, Tree, TreeEntryMode};
use crate::odb::Odb;
use crate::refs::{RefStore, Reference};
use crate::{EngineError, EngineResult};

pub const DEFAULT_BRANCH: &str = "main";
pub const HEAD_REF: &str = "refs/heads/main";

/// One file reached by walking a commit's tree recursively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub id: ObjectId,
    pub mode: TreeEntryMode,
}

#[derive(Clone)]
pub struct Repository {
    fs: Arc<dyn Fs>,
    odb: Odb,
    refs: RefStore,
}

impl Repository {
    /// Whether an object store already exists at this subtree.
    pub fn exists(fs: &Arc<dyn Fs>) -> bool {
        RefStore::new(fs.clone()).head_exists()
    }

    /// Initialize an empty repository: object directory, refs, and an
    /// unborn `HEAD` pointing at the default branch.
    pub fn init(fs: Arc<dyn Fs>) -> EngineResult<Self> {
        if Self::exists(&fs) {
            return Err(EngineError::AlreadyInitialized);
        }
        fs.mkdir_all("objects", 0o755)?;
        fs.mkdir_all("refs/heads", 0o755)?;
        let refs = RefStore::new(fs.clone());
        refs.set_head_target(HEAD_REF)?;
        tracing::debug!("initialized empty repository");
        Ok(Self {
            odb: Odb::new(fs.clone()),
            refs,
            fs,
        })
    }

    /// Open an existing repository.
    pub fn open(fs: Arc<dyn Fs>) -> EngineResult<Self> {
        if !Self::exists(&fs) {
            return Err(EngineError::NotARepository);
        }
        Ok(Self {
            odb: Odb::new(fs.clone()),
            refs: RefStore::new(fs.clone()),
            fs,
        })
    }

    pub fn fs(&self) -> &Arc<dyn Fs> {
        &self.fs
    }

    pub fn odb(&self) -> &Odb {
        &self.odb
    }

    pub(crate) fn refs(&self) -> &RefStore {
        &self.refs
    }

    /// The reference `HEAD` resolves to, or `None` while the repository has
    /// no commits (end of history, not an error).
    pub fn head(&self) -> EngineResult<Option<Reference>> {
        let target = self.refs.head_target()?;
        Ok(self
            .refs
            .read(&target)?
            .map(|id| Reference { name: target, id }))
    }

    pub fn commit(&self, id: &ObjectId) -> EngineResult<Commit> {
        self.odb.commit(id)
    }

    /// The tree of the given commit.
    pub fn tree(&self, commit_id: &ObjectId) -> EngineResult<Tree> {
        let commit = self.odb.commit(commit_id)?;
        self.odb.tree(&commit.tree)
    }

    pub fn blob(&self, id: &ObjectId) -> EngineResult<Vec<u8>> {
        self.odb.blob(id)
    }

    /// All refs, sorted by name.
    pub fn references(&self) -> EngineResult<Vec<Reference>> {
        self.refs.list()
    }

    /// Every commit reachable from any ref, unordered.
    fn reachable_commits(&self) -> EngineResult<Vec<(ObjectId, Commit)>> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<ObjectId> =
            self.refs.list()?.into_iter().map(|r| r.id).collect();
        let mut out = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let commit = self.odb.commit(&id)?;
            queue.extend(commit.parents.iter().copied());
            out.push((id, commit));
        }
        Ok(out)
    }

    /// Number of commits reachable from all refs.
    pub fn commits_count(&self) -> EngineResult<usize> {
        Ok(self.reachable_commits()?.len())
    }

    /// The most recent commit across all refs, or `None` for an empty
    /// repository.
    pub fn last_commit(&self) -> EngineResult<Option<(ObjectId, Commit)>> {
        let mut commits = self.reachable_commits()?;
        commits.sort_by_key(|(id, c)| (c.committer.when, *id));
        Ok(commits.pop())
    }

    /// The most recent commit on the first-parent history of `HEAD` whose
    /// tree changed `path`. `None` when the repository is empty or the path
    /// was never committed.
    pub fn file_last_commit(&self, path: &str) -> EngineResult<Option<(ObjectId, Commit)>> {
        let Some(head) = self.head()? else {
            return Ok(None);
        };

        let mut current = Some(head.id);
        while let Some(id) = current {
            let commit = self.odb.commit(&id)?;
            let here = self.blob_at(&commit, path)?;
            let in_parent = match commit.parents.first() {
                Some(parent_id) => {
                    let parent = self.odb.commit(parent_id)?;
                    self.blob_at(&parent, path)?
                }
                None => None,
            };
            if here.is_some() && here != in_parent {
                return Ok(Some((id, commit)));
            }
            current = commit.parents.first().copied();
        }
        Ok(None)
    }

    /// The blob id `path` resolves to within a commit's tree, if present.
    fn blob_at(&self, commit: &Commit, path: &str) -> EngineResult<Option<ObjectId>> {
        let mut tree = self.odb.tree(&commit.tree)?;
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(comp) = components.next() {
            let Some(entry) = tree.entry(comp) else {
                return Ok(None);
            };
            if components.peek().is_none() {
                return Ok((!entry.mode.is_dir()).then_some(entry.id));
            }
            if !entry.mode.is_dir() {
                return Ok(None);
            }
            tree = self.odb.tree(&entry.id)?;
        }
        Ok(None)
    }

    /// Walk the tree of `commit_id` recursively, yielding every file with
    /// its full path, sorted by path.
    pub fn tree_files(&self, commit_id: &ObjectId) -> EngineResult<Vec<FileEntry>> {
        let commit = self.odb.commit(commit_id)?;
        let mut out = Vec::new();
        self.walk_tree(&commit.tree, "", &mut out)?;
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    fn walk_tree(&self, tree_id: &ObjectId, prefix: &str, out: &mut Vec<FileEntry>) -> EngineResult<()> {
        let tree = self.odb.tree(tree_id)?;
        for entry in &tree.entries {
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            if entry.mode.is_dir() {
                self.walk_tree(&entry.id, &path, out)?;
            } else {
                out.push(FileEntry {
                    path,
                    id: entry.id,
                    mode: entry.mode,
                });
            }
        }
        Ok(())
    }

    /// The closure of objects reachable from the given commits: commits,
    /// their trees and subtrees, and all blobs. Used to assemble packs.
    pub fn closure(&self, tips: &[ObjectId]) -> EngineResult<Vec<ObjectId>> {
        let mut seen: HashSet<ObjectId> = HashSet::new();
        let mut ordered = Vec::new();
        let mut queue: VecDeque<ObjectId> = tips.iter().copied().collect();

        // Commits first, then their trees and blobs.
        let mut trees = Vec::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let commit = self.odb.commit(&id)?;
            ordered.push(id);
            trees.push(commit.tree);
            queue.extend(commit.parents.iter().copied());
        }

        let mut tree_queue: VecDeque<ObjectId> = trees.into();
        while let Some(tree_id) = tree_queue.pop_front() {
            if !seen.insert(tree_id) {
                continue;
            }
            ordered.push(tree_id);
            for entry in self.odb.tree(&tree_id)?.entries {
                if entry.mode.is_dir() {
                    tree_queue.push_back(entry.id);
                } else if seen.insert(entry.id) {
                    ordered.push(entry.id);
                }
            }
        }
        Ok(ordered)
    }

    /// Apply one ref update command. A zero old/new id means creation and
    /// deletion respectively. The new target must already be present in the
    /// object database.
    pub fn update_reference(
        &self,
        name: &str,
        new: &ObjectId,
    ) -> EngineResult<()> {
        if new.is_zero() {
            self.refs.delete(name)
        } else {
            if !self.odb.contains(new) {
                return Err(EngineError::ObjectNotFound(new.to_hex()));
            }
            self.refs.write(name, new)
        }
    }

    /// Point an unborn `HEAD` at `branch_ref` so the repository's head
    /// resolves after the first push to a non-default branch.
    pub(crate) fn adopt_head_if_unborn(&self, branch_ref: &str) -> EngineResult<()> {
        let target = self.refs.head_target()?;
        if self.refs.read(&target)?.is_none() && self.refs.read(branch_ref)?.is_some() {
            self.refs.set_head_target(branch_ref)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Helpers for building real commits in tests.

    use super::*;
    use crate::object::{ObjectKind, Signature, Tree, TreeEntry};

    /// Commit a set of `(path, content)` files on top of `parent`, writing
    /// all objects through the repository's odb. Paths must be flat or
    /// nested with `/` separators.
    pub(crate) fn commit_files(
        repo: &Repository,
        parents: &[ObjectId],
        files: &[(&str, &[u8])],
        message: &str,
        when: i64,
    ) -> ObjectId {
        let tree_id = write_tree(repo, files);
        let commit = Commit {
            tree: tree_id,
            parents: parents.to_vec(),
            author: Signature::new("Test Author", "test@example.com", when),
            committer: Signature::new("Test Author", "test@example.com", when),
            message: message.to_string(),
        };
        let id = repo.odb().write(ObjectKind::Commit, &commit.encode()).unwrap();
        repo.refs().write(HEAD_REF, &id).unwrap();
        id
    }

    fn write_tree(repo: &Repository, files: &[(&str, &[u8])]) -> ObjectId {
        // Group by leading directory, recursing for nested paths.
        let mut here: Vec<TreeEntry> = Vec::new();
        let mut dirs: std::collections::BTreeMap<String, Vec<(String, Vec<u8>)>> =
            std::collections::BTreeMap::new();

        for (path, content) in files {
            match path.split_once('/') {
                None => {
                    let blob = repo.odb().write(ObjectKind::Blob, content).unwrap();
                    here.push(TreeEntry {
                        mode: TreeEntryMode::Regular,
                        name: path.to_string(),
                        id: blob,
                    });
                }
                Some((dir, rest)) => {
                    dirs.entry(dir.to_string())
                        .or_default()
                        .push((rest.to_string(), content.to_vec()));
                }
            }
        }

        for (dir, children) in dirs {
            let nested: Vec<(&str, &[u8])> = children
                .iter()
                .map(|(p, c)| (p.as_str(), c.as_slice()))
                .collect();
            let sub = write_tree(repo, &nested);
            here.push(TreeEntry {
                mode: TreeEntryMode::Directory,
                name: dir,
                id: sub,
            });
        }

        let tree = Tree::new(here);
        repo.odb().write(ObjectKind::Tree, &tree.encode()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::commit_files;
    use super::*;
    use anchorgit_vfs::{MemoryStore, Vfs};

    fn new_repo() -> Repository {
        let fs: Arc<dyn Fs> = Arc::new(Vfs::new(Arc::new(MemoryStore::new())));
        Repository::init(fs).unwrap()
    }

    #[test]
    fn init_twice_is_rejected_and_open_sees_it() {
        let fs: Arc<dyn Fs> = Arc::new(Vfs::new(Arc::new(MemoryStore::new())));
        Repository::init(fs.clone()).unwrap();
        assert!(matches!(
            Repository::init(fs.clone()),
            Err(EngineError::AlreadyInitialized)
        ));
        assert!(Repository::open(fs).is_ok());
    }

    #[test]
    fn empty_repository_reports_no_history() {
        let repo = new_repo();
        assert!(repo.head().unwrap().is_none());
        assert_eq!(repo.commits_count().unwrap(), 0);
        assert!(repo.last_commit().unwrap().is_none());
        assert!(repo.file_last_commit("README.md").unwrap().is_none());
    }

    #[test]
    fn history_queries_after_commits() {
        let repo = new_repo();
        let c1 = commit_files(&repo, &[], &[("README.md", b"v1")], "one\n", 100);
        let c2 = commit_files(
            &repo,
            &[c1],
            &[("README.md", b"v1"), ("src/main.rs", b"fn main() {}")],
            "two\n",
            200,
        );

        let head = repo.head().unwrap().unwrap();
        assert_eq!(head.id, c2);
        assert_eq!(head.name, HEAD_REF);
        assert_eq!(repo.commits_count().unwrap(), 2);

        let (last_id, last) = repo.last_commit().unwrap().unwrap();
        assert_eq!(last_id, c2);
        assert_eq!(last.message, "two\n");
    }

    #[test]
    fn file_last_commit_tracks_the_touching_commit() {
        let repo = new_repo();
        let c1 = commit_files(&repo, &[], &[("README.md", b"v1")], "one\n", 100);
        let c2 = commit_files(
            &repo,
            &[c1],
            &[("README.md", b"v1"), ("other.txt", b"x")],
            "two\n",
            200,
        );

        // README.md last changed in c1, other.txt in c2.
        let (id, _) = repo.file_last_commit("README.md").unwrap().unwrap();
        assert_eq!(id, c1);
        let (id, _) = repo.file_last_commit("other.txt").unwrap().unwrap();
        assert_eq!(id, c2);
        assert!(repo.file_last_commit("absent").unwrap().is_none());
    }

    #[test]
    fn tree_files_walks_nested_directories() {
        let repo = new_repo();
        let c = commit_files(
            &repo,
            &[],
            &[("README.md", b"r"), ("src/lib.rs", b"l"), ("src/deep/mod.rs", b"m")],
            "tree\n",
            100,
        );

        let files = repo.tree_files(&c).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/deep/mod.rs", "src/lib.rs"]);
        assert_eq!(repo.blob(&files[0].id).unwrap(), b"r");
    }

    #[test]
    fn closure_collects_commits_trees_and_blobs() {
        let repo = new_repo();
        let c1 = commit_files(&repo, &[], &[("a", b"1")], "one\n", 100);
        let c2 = commit_files(&repo, &[c1], &[("a", b"1"), ("b", b"2")], "two\n", 200);

        let ids = repo.closure(&[c2]).unwrap();
        // 2 commits, 2 root trees, blobs "1" and "2".
        assert_eq!(ids.len(), 6);
        assert!(ids.contains(&c1));
        assert!(ids.contains(&c2));
    }
}
