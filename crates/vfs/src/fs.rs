//! The filesystem facade over the path tree.
//!
//! [`Fs`] is the contract the rest of the system programs against; [`Vfs`]
//! is the root implementation and [`ChrootFs`](crate::ChrootFs) re-roots it
//! at a sub-path. The tree is guarded by a single mutex: the maps are shared
//! process-wide and every mutation requires exclusion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::file::{FileHandle, FileKind, FileNode, Metadata, OpenFlags};
use crate::path;
use crate::store::{ContentId, ContentStore};
use crate::tree::PathTree;
use crate::{VfsError, VfsResult};

/// Bound on symlink hops during resolution; beyond it the chain is treated
/// as a cycle.
const MAX_SYMLINK_HOPS: u32 = 40;

/// The hierarchical file API backed by a content-addressable store.
///
/// Paths are `/`-separated; relative paths are interpreted from the root.
/// Implementations must uphold the duplicate-handle contract: every
/// successful open returns an independent cursor over shared content.
pub trait Fs: Send + Sync {
    /// Create (or truncate) `path` and open it read-write.
    fn create(&self, path: &str) -> VfsResult<FileHandle>;

    /// Open `path` read-only.
    fn open(&self, path: &str) -> VfsResult<FileHandle>;

    /// Generalized open with explicit flags and permission bits.
    fn open_file(&self, path: &str, flags: OpenFlags, perm: u32) -> VfsResult<FileHandle>;

    /// Stat `path`, following symlinks.
    fn stat(&self, path: &str) -> VfsResult<Metadata>;

    /// Stat `path` without following a final symlink.
    fn lstat(&self, path: &str) -> VfsResult<Metadata>;

    /// Directory entries of `path`, sorted by name. A missing path lists as
    /// empty.
    fn read_dir(&self, path: &str) -> VfsResult<Vec<Metadata>>;

    /// Create a directory and any missing parents.
    fn mkdir_all(&self, path: &str, perm: u32) -> VfsResult<()>;

    /// Move `from` (and every descendant) to `to`.
    fn rename(&self, from: &str, to: &str) -> VfsResult<()>;

    /// Remove a file, symlink, or empty directory.
    fn remove(&self, path: &str) -> VfsResult<()>;

    /// Create `link` as a symbolic link to `target`.
    fn symlink(&self, target: &str, link: &str) -> VfsResult<()>;

    /// The target of the symbolic link at `link`.
    fn readlink(&self, link: &str) -> VfsResult<String>;

    /// Create and open a uniquely named file under `dir`.
    fn temp_file(&self, dir: &str, prefix: &str) -> VfsResult<FileHandle>;

    /// Join path elements into a single normalized path.
    fn join(&self, elems: &[&str]) -> String {
        path::join_all(elems)
    }
}

/// The root virtual filesystem: a mutex-guarded [`PathTree`] over a content
/// store.
pub struct Vfs {
    tree: Mutex<PathTree>,
    store: Arc<dyn ContentStore>,
    temp_counter: AtomicU64,
}

impl Vfs {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            tree: Mutex::new(PathTree::new()),
            store,
            temp_counter: AtomicU64::new(0),
        }
    }

    /// The backing content store.
    pub fn store(&self) -> Arc<dyn ContentStore> {
        self.store.clone()
    }

    /// Resolve `path` to its node, following symlinks up to the hop bound.
    /// Returns the final resolved path alongside the node.
    fn resolve(&self, path: &str, follow: bool) -> VfsResult<(String, Arc<FileNode>)> {
        let mut current = path::normalize(path);
        let mut hops = 0;
        loop {
            let node = self
                .tree
                .lock()
                .unwrap()
                .get(&current)
                .ok_or_else(|| VfsError::NotFound(current.clone()))?;
            if !follow || !node.kind().is_symlink() {
                return Ok((current, node));
            }
            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                return Err(VfsError::SymlinkLoop(path.to_string()));
            }
            current = self.link_destination(&current, &node);
        }
    }

    /// Absolute destination of a symlink node: relative targets are joined
    /// against the link's containing directory.
    fn link_destination(&self, link_path: &str, node: &FileNode) -> String {
        let target = node.link_target();
        if path::is_abs(&target) {
            path::normalize(&target)
        } else {
            path::join(&path::parent(link_path), &target)
        }
    }

    /// Capture the tree's shape and content identifiers. Content bytes stay
    /// in the store; a restored tree faults them back in on first read.
    pub fn snapshot(&self) -> FsSnapshot {
        let tree = self.tree.lock().unwrap();
        let mut entries: Vec<SnapshotEntry> = tree
            .paths()
            .into_iter()
            .filter_map(|p| {
                let node = tree.get(&p)?;
                Some(SnapshotEntry {
                    kind: match node.kind() {
                        FileKind::Regular => SnapshotKind::File,
                        FileKind::Directory => SnapshotKind::Dir,
                        FileKind::Symlink => SnapshotKind::Symlink,
                    },
                    target: node.kind().is_symlink().then(|| node.link_target()),
                    content_id: node.content_id(),
                    perm: node.perm(),
                    path: p,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!(entries = entries.len(), "captured filesystem snapshot");
        FsSnapshot { entries }
    }

    /// Rebuild a tree over `store` from a snapshot.
    pub fn restore(store: Arc<dyn ContentStore>, snapshot: &FsSnapshot) -> VfsResult<Self> {
        let vfs = Self::new(store);
        {
            let mut tree = vfs.tree.lock().unwrap();
            for entry in &snapshot.entries {
                let node = match entry.kind {
                    SnapshotKind::Dir => {
                        tree.mkdir_all(&entry.path, entry.perm)?;
                        continue;
                    }
                    SnapshotKind::Symlink => FileNode::new_symlink(
                        path::basename(&entry.path),
                        entry.target.as_deref().unwrap_or(""),
                    ),
                    SnapshotKind::File => FileNode::from_content_id(
                        path::basename(&entry.path),
                        FileKind::Regular,
                        entry.perm,
                        entry.content_id.clone(),
                    ),
                };
                tree.insert_node(&entry.path, node)?;
            }
        }
        tracing::info!(entries = snapshot.entries.len(), "filesystem restored from snapshot");
        Ok(vfs)
    }
}

impl Fs for Vfs {
    fn create(&self, p: &str) -> VfsResult<FileHandle> {
        self.open_file(p, OpenFlags::create_rw(), 0o666)
    }

    fn open(&self, p: &str) -> VfsResult<FileHandle> {
        self.open_file(p, OpenFlags::read_only(), 0)
    }

    fn open_file(&self, p: &str, flags: OpenFlags, perm: u32) -> VfsResult<FileHandle> {
        let mut current = path::normalize(p);
        let mut hops = 0;
        let node = loop {
            let mut tree = self.tree.lock().unwrap();
            match tree.get(&current) {
                None => {
                    if !flags.create {
                        return Err(VfsError::NotFound(current));
                    }
                    if !flags.writable() {
                        return Err(VfsError::PermissionDenied {
                            path: current,
                            op: "create without write access",
                        });
                    }
                    break tree.insert_file(&current, perm)?;
                }
                Some(node) => {
                    if flags.exclusive {
                        return Err(VfsError::AlreadyExists(current));
                    }
                    if node.kind().is_symlink() {
                        hops += 1;
                        if hops > MAX_SYMLINK_HOPS {
                            return Err(VfsError::SymlinkLoop(p.to_string()));
                        }
                        let dest = self.link_destination(&current, &node);
                        drop(tree);
                        current = dest;
                        continue;
                    }
                    if node.kind().is_dir() {
                        return Err(VfsError::IsADirectory(current));
                    }
                    break node;
                }
            }
        };

        Ok(FileHandle::duplicate(
            &current,
            node,
            flags,
            self.store.clone(),
        ))
    }

    fn stat(&self, p: &str) -> VfsResult<Metadata> {
        let (_, node) = self.resolve(p, true)?;
        let mut meta = node.stat();
        // The reported name is always the name of the stated path, which may
        // belong to a link rather than its target.
        meta.name = path::basename(&path::normalize(p)).to_string();
        Ok(meta)
    }

    fn lstat(&self, p: &str) -> VfsResult<Metadata> {
        let (_, node) = self.resolve(p, false)?;
        Ok(node.stat())
    }

    fn read_dir(&self, p: &str) -> VfsResult<Vec<Metadata>> {
        let listed = match self.resolve(p, true) {
            Ok((resolved, _)) => resolved,
            Err(VfsError::NotFound(_)) => path::normalize(p),
            Err(e) => return Err(e),
        };
        let children = self.tree.lock().unwrap().children(&listed);
        Ok(children.iter().map(|n| n.stat()).collect())
    }

    fn mkdir_all(&self, p: &str, perm: u32) -> VfsResult<()> {
        self.tree
            .lock()
            .unwrap()
            .mkdir_all(&path::normalize(p), perm)
    }

    fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.tree
            .lock()
            .unwrap()
            .rename(&path::normalize(from), &path::normalize(to))
    }

    fn remove(&self, p: &str) -> VfsResult<()> {
        // Removing a symlink removes the link itself, never its target.
        self.tree.lock().unwrap().remove(&path::normalize(p))
    }

    fn symlink(&self, target: &str, link: &str) -> VfsResult<()> {
        let link = path::normalize(link);
        let mut tree = self.tree.lock().unwrap();
        if tree.has(&link) {
            return Err(VfsError::AlreadyExists(link));
        }
        tree.insert_symlink(&link, target)?;
        Ok(())
    }

    fn readlink(&self, link: &str) -> VfsResult<String> {
        let (_, node) = self.resolve(link, false)?;
        if !node.kind().is_symlink() {
            return Err(VfsError::NotSymlink(path::normalize(link)));
        }
        Ok(node.link_target())
    }

    fn temp_file(&self, dir: &str, prefix: &str) -> VfsResult<FileHandle> {
        loop {
            let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
            let candidate = path::join(dir, &format!("{prefix}{n}"));
            let flags = OpenFlags::new()
                .read(true)
                .write(true)
                .create(true)
                .exclusive(true);
            match self.open_file(&candidate, flags, 0o600) {
                Err(VfsError::AlreadyExists(_)) => continue,
                other => return other,
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SnapshotKind {
    File,
    Dir,
    Symlink,
}

/// One persisted tree entry: path, kind, and where its content lives.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotEntry {
    path: String,
    kind: SnapshotKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_id: Option<ContentId>,
    perm: u32,
}

/// A serializable capture of the tree's shape; content bytes remain in the
/// content store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FsSnapshot {
    entries: Vec<SnapshotEntry>,
}

impl FsSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::io::SeekFrom;

    fn new_fs() -> Vfs {
        Vfs::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn open_of_missing_path_fails_without_create() {
        let fs = new_fs();
        assert!(matches!(fs.open("/nope"), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn create_then_open_reads_back_identical_bytes() {
        let fs = new_fs();
        let mut f = fs.create("/docs/readme.txt").unwrap();
        f.write(b"hello anchor").unwrap();

        let mut again = fs.open("/docs/readme.txt").unwrap();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut again, &mut buf).unwrap();
        assert_eq!(buf, b"hello anchor");
    }

    #[test]
    fn write_round_trips_through_duplicate_handles() {
        let fs = new_fs();
        let mut w = fs.create("/f").unwrap();
        w.write(b"abcdef").unwrap();

        let dup = fs.open("/f").unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(dup.read_at(&mut buf, 0).unwrap(), 6);
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn write_through_duplicate_updates_content_id_of_fresh_open() {
        let fs = new_fs();
        let mut first = fs.create("/f").unwrap();
        first.write(b"one").unwrap();
        let before = fs.open("/f").unwrap().content_id().unwrap();

        let mut dup = fs
            .open_file("/f", OpenFlags::new().read(true).write(true), 0o644)
            .unwrap();
        dup.write(b"two").unwrap();

        let after = fs.open("/f").unwrap().content_id().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn every_write_is_persisted_before_returning() {
        let store = Arc::new(MemoryStore::new());
        let fs = Vfs::new(store.clone());
        let mut f = fs.create("/f").unwrap();
        f.write(b"durable").unwrap();

        let id = f.content_id().unwrap();
        assert_eq!(store.get(&id).unwrap(), b"durable");
    }

    #[test]
    fn exclusive_open_of_existing_path_fails() {
        let fs = new_fs();
        fs.create("/f").unwrap();
        let flags = OpenFlags::create_rw().exclusive(true);
        assert!(matches!(
            fs.open_file("/f", flags, 0o644),
            Err(VfsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn opening_a_directory_fails() {
        let fs = new_fs();
        fs.mkdir_all("/d", 0o755).unwrap();
        assert!(matches!(fs.open("/d"), Err(VfsError::IsADirectory(_))));
    }

    #[test]
    fn creating_without_write_access_is_rejected() {
        let fs = new_fs();
        let flags = OpenFlags::read_only().create(true);
        assert!(matches!(
            fs.open_file("/f", flags, 0o644),
            Err(VfsError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn read_on_write_only_handle_is_rejected() {
        let fs = new_fs();
        let flags = OpenFlags::new().write(true).create(true);
        let mut f = fs.open_file("/f", flags, 0o644).unwrap();
        f.write(b"x").unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(
            f.read_at(&mut buf, 0),
            Err(VfsError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn closed_handle_rejects_operations() {
        let fs = new_fs();
        let mut f = fs.create("/f").unwrap();
        f.close().unwrap();
        assert!(matches!(f.write(b"x"), Err(VfsError::Closed(_))));
        assert!(matches!(f.close(), Err(VfsError::Closed(_))));
    }

    #[test]
    fn reads_past_end_return_partial_then_zero() {
        let fs = new_fs();
        let mut f = fs.create("/f").unwrap();
        f.write(b"abc").unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf).unwrap(), 3);
        assert_eq!(f.read(&mut buf).unwrap(), 0);
        assert_eq!(f.read_at(&mut buf, 100).unwrap(), 0);
    }

    #[test]
    fn write_past_end_zero_fills_the_gap() {
        let fs = new_fs();
        let mut f = fs.create("/f").unwrap();
        f.write(b"ab").unwrap();
        f.write_at(b"z", 4).unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(f.read_at(&mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"ab\0\0z");
    }

    #[test]
    fn append_positions_cursor_at_end() {
        let fs = new_fs();
        let mut f = fs.create("/f").unwrap();
        f.write(b"head").unwrap();

        let flags = OpenFlags::new().read(true).append(true);
        let mut a = fs.open_file("/f", flags, 0).unwrap();
        a.write(b"-tail").unwrap();

        let mut buf = [0u8; 9];
        assert_eq!(a.read_at(&mut buf, 0).unwrap(), 9);
        assert_eq!(&buf, b"head-tail");
    }

    #[test]
    fn truncate_changes_buffer_but_not_content_id() {
        let fs = new_fs();
        let mut f = fs.create("/f").unwrap();
        f.write(b"0123456789").unwrap();
        let before = f.content_id().unwrap();

        f.truncate(4).unwrap();
        assert_eq!(f.stat().unwrap().size, 4);
        assert_eq!(f.content_id().unwrap(), before);

        f.write_at(b"!", 0).unwrap();
        assert_ne!(f.content_id().unwrap(), before);
    }

    #[test]
    fn rename_moves_directory_and_descendants() {
        let fs = new_fs();
        let mut f = fs.create("/a/x").unwrap();
        f.write(b"payload").unwrap();

        fs.rename("/a", "/b").unwrap();

        assert!(matches!(fs.stat("/a"), Err(VfsError::NotFound(_))));
        assert!(matches!(fs.open("/a/x"), Err(VfsError::NotFound(_))));
        let mut moved = fs.open("/b/x").unwrap();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut moved, &mut buf).unwrap();
        assert_eq!(buf, b"payload");
    }

    #[test]
    fn remove_semantics() {
        let fs = new_fs();
        fs.create("/d/f").unwrap();
        assert!(matches!(
            fs.remove("/d"),
            Err(VfsError::DirectoryNotEmpty(_))
        ));
        fs.remove("/d/f").unwrap();
        fs.remove("/d").unwrap();
        assert!(matches!(fs.stat("/d"), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn symlinks_resolve_on_open_and_stat() {
        let fs = new_fs();
        let mut f = fs.create("/real/data").unwrap();
        f.write(b"linked").unwrap();
        fs.symlink("/real/data", "/alias").unwrap();

        let mut via = fs.open("/alias").unwrap();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut via, &mut buf).unwrap();
        assert_eq!(buf, b"linked");

        // stat follows; lstat does not; the reported name is the link's.
        assert_eq!(fs.stat("/alias").unwrap().size, 6);
        assert_eq!(fs.stat("/alias").unwrap().name, "alias");
        assert!(fs.lstat("/alias").unwrap().is_symlink());
        assert_eq!(fs.readlink("/alias").unwrap(), "/real/data");
    }

    #[test]
    fn relative_symlink_targets_resolve_against_link_directory() {
        let fs = new_fs();
        let mut f = fs.create("/dir/file").unwrap();
        f.write(b"rel").unwrap();
        fs.symlink("file", "/dir/link").unwrap();

        let mut via = fs.open("/dir/link").unwrap();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut via, &mut buf).unwrap();
        assert_eq!(buf, b"rel");
    }

    #[test]
    fn symlink_cycles_are_rejected() {
        let fs = new_fs();
        fs.symlink("/b", "/a").unwrap();
        fs.symlink("/a", "/b").unwrap();
        assert!(matches!(fs.open("/a"), Err(VfsError::SymlinkLoop(_))));
    }

    #[test]
    fn removing_a_symlink_keeps_its_target() {
        let fs = new_fs();
        fs.create("/target").unwrap();
        fs.symlink("/target", "/link").unwrap();
        fs.remove("/link").unwrap();
        assert!(fs.stat("/target").is_ok());
        assert!(matches!(fs.lstat("/link"), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn symlink_over_existing_path_fails() {
        let fs = new_fs();
        fs.create("/f").unwrap();
        assert!(matches!(
            fs.symlink("/elsewhere", "/f"),
            Err(VfsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn readlink_of_regular_file_fails() {
        let fs = new_fs();
        fs.create("/f").unwrap();
        assert!(matches!(fs.readlink("/f"), Err(VfsError::NotSymlink(_))));
    }

    #[test]
    fn read_dir_is_sorted_and_empty_for_missing() {
        let fs = new_fs();
        fs.create("/d/b").unwrap();
        fs.create("/d/a").unwrap();
        fs.mkdir_all("/d/c", 0o755).unwrap();

        let names: Vec<String> = fs
            .read_dir("/d")
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(fs.read_dir("/absent").unwrap().is_empty());
    }

    #[test]
    fn temp_file_yields_unique_paths() {
        let fs = new_fs();
        let a = fs.temp_file("/tmp", "pack-").unwrap();
        let b = fs.temp_file("/tmp", "pack-").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn snapshot_restore_faults_content_back_in() {
        let store = Arc::new(MemoryStore::new());
        let fs = Vfs::new(store.clone());
        let mut f = fs.create("/a/data").unwrap();
        f.write(b"persisted bytes").unwrap();
        fs.symlink("data", "/a/link").unwrap();

        let snap = fs.snapshot();
        assert!(snap.len() >= 3);

        let restored = Vfs::restore(store, &snap).unwrap();
        let mut r = restored.open("/a/data").unwrap();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut r, &mut buf).unwrap();
        assert_eq!(buf, b"persisted bytes");
        assert_eq!(restored.readlink("/a/link").unwrap(), "data");
    }
}
