//! A filesystem view rooted at a sub-path.
//!
//! Every operation is re-rooted beneath the configured prefix, confining a
//! consumer (one repository's object store) to its own subtree. Paths are
//! normalized before prefixing, so `..` components cannot escape the root.

use std::sync::Arc;

use crate::file::{FileHandle, Metadata, OpenFlags};
use crate::fs::Fs;
use crate::path;
use crate::VfsResult;

pub struct ChrootFs {
    inner: Arc<dyn Fs>,
    root: String,
}

impl ChrootFs {
    pub fn new(inner: Arc<dyn Fs>, root: &str) -> Self {
        Self {
            inner,
            root: path::normalize(root),
        }
    }

    /// The subtree this view is confined to, as a path on the inner
    /// filesystem.
    pub fn root(&self) -> &str {
        &self.root
    }

    fn full(&self, p: &str) -> String {
        // Normalizing first makes the path absolute, so the concatenation
        // cannot traverse above the root; the outer normalize only cleans
        // the doubled separator when the root is `/`.
        path::normalize(&format!("{}{}", self.root, path::normalize(p)))
    }
}

impl Fs for ChrootFs {
    fn create(&self, p: &str) -> VfsResult<FileHandle> {
        self.inner.create(&self.full(p))
    }

    fn open(&self, p: &str) -> VfsResult<FileHandle> {
        self.inner.open(&self.full(p))
    }

    fn open_file(&self, p: &str, flags: OpenFlags, perm: u32) -> VfsResult<FileHandle> {
        self.inner.open_file(&self.full(p), flags, perm)
    }

    fn stat(&self, p: &str) -> VfsResult<Metadata> {
        self.inner.stat(&self.full(p))
    }

    fn lstat(&self, p: &str) -> VfsResult<Metadata> {
        self.inner.lstat(&self.full(p))
    }

    fn read_dir(&self, p: &str) -> VfsResult<Vec<Metadata>> {
        self.inner.read_dir(&self.full(p))
    }

    fn mkdir_all(&self, p: &str, perm: u32) -> VfsResult<()> {
        self.inner.mkdir_all(&self.full(p), perm)
    }

    fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.inner.rename(&self.full(from), &self.full(to))
    }

    fn remove(&self, p: &str) -> VfsResult<()> {
        self.inner.remove(&self.full(p))
    }

    fn symlink(&self, target: &str, link: &str) -> VfsResult<()> {
        // Absolute targets are confined: they resolve inside this view, not
        // against the host root.
        let target = if path::is_abs(target) {
            self.full(target)
        } else {
            target.to_string()
        };
        self.inner.symlink(&target, &self.full(link))
    }

    fn readlink(&self, link: &str) -> VfsResult<String> {
        let target = self.inner.readlink(&self.full(link))?;
        // Present confined absolute targets relative to this view's root.
        if self.root != "/" {
            if let Some(rest) = target.strip_prefix(&self.root) {
                if path::is_abs(rest) {
                    return Ok(rest.to_string());
                }
            }
        }
        Ok(target)
    }

    fn temp_file(&self, dir: &str, prefix: &str) -> VfsResult<FileHandle> {
        self.inner.temp_file(&self.full(dir), prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::{Vfs, VfsError};

    #[test]
    fn operations_are_confined_to_the_subtree() {
        let root: Arc<dyn Fs> = Arc::new(Vfs::new(Arc::new(MemoryStore::new())));
        let jail = ChrootFs::new(root.clone(), "/repos/demo");

        let mut f = jail.create("/HEAD").unwrap();
        f.write(b"ref: refs/heads/main\n").unwrap();

        assert!(root.stat("/repos/demo/HEAD").is_ok());
        assert!(jail.stat("/HEAD").is_ok());
        assert!(matches!(jail.stat("/repos"), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn dotdot_cannot_escape_the_root() {
        let root: Arc<dyn Fs> = Arc::new(Vfs::new(Arc::new(MemoryStore::new())));
        root.create("/outside").unwrap();
        let jail = ChrootFs::new(root, "/repos/demo");

        assert!(matches!(
            jail.open("../../outside"),
            Err(VfsError::NotFound(_))
        ));
    }

    #[test]
    fn absolute_symlink_targets_stay_confined() {
        let root: Arc<dyn Fs> = Arc::new(Vfs::new(Arc::new(MemoryStore::new())));
        let jail = ChrootFs::new(root.clone(), "/repos/demo");

        let mut f = jail.create("/data").unwrap();
        f.write(b"inside").unwrap();
        jail.symlink("/data", "/link").unwrap();

        // The view reads its own paths back; the host sees them re-rooted.
        assert_eq!(jail.readlink("/link").unwrap(), "/data");
        assert_eq!(
            root.readlink("/repos/demo/link").unwrap(),
            "/repos/demo/data"
        );

        let mut via = jail.open("/link").unwrap();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut via, &mut buf).unwrap();
        assert_eq!(buf, b"inside");
    }

    #[test]
    fn chroots_nest() {
        let root: Arc<dyn Fs> = Arc::new(Vfs::new(Arc::new(MemoryStore::new())));
        let outer = Arc::new(ChrootFs::new(root.clone(), "/a"));
        let inner = ChrootFs::new(outer, "/b");
        inner.create("/f").unwrap();
        assert!(root.stat("/a/b/f").is_ok());
    }
}
