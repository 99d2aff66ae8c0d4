//! The path-indexed tree of canonical file nodes.
//!
//! Two indexes are kept consistent: `files` maps every normalized path to its
//! node, and `children` maps every directory path to its direct children by
//! name. Creating an entry materializes the full parent chain; renaming a
//! path moves every descendant with it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::file::{FileKind, FileNode};
use crate::path;
use crate::{VfsError, VfsResult};

#[derive(Default)]
pub(crate) struct PathTree {
    files: HashMap<String, Arc<FileNode>>,
    children: HashMap<String, BTreeMap<String, Arc<FileNode>>>,
}

impl PathTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, path: &str) -> Option<Arc<FileNode>> {
        self.files.get(path).cloned()
    }

    pub(crate) fn has(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Direct children of `path`, sorted by name.
    pub(crate) fn children(&self, path: &str) -> Vec<Arc<FileNode>> {
        self.children
            .get(path)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// All paths currently present, unordered.
    pub(crate) fn paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    /// Create a regular file node at `path`, materializing missing parents.
    /// The path must not already exist.
    pub(crate) fn insert_file(&mut self, path: &str, perm: u32) -> VfsResult<Arc<FileNode>> {
        debug_assert!(!self.files.contains_key(path));
        let node = FileNode::new_file(path::basename(path), perm);
        self.link(path, node.clone())?;
        Ok(node)
    }

    /// Create a symlink node at `path` storing `target` as its content.
    pub(crate) fn insert_symlink(&mut self, path: &str, target: &str) -> VfsResult<Arc<FileNode>> {
        let node = FileNode::new_symlink(path::basename(path), target);
        self.link(path, node.clone())?;
        Ok(node)
    }

    /// Re-attach a prebuilt node (snapshot restore).
    pub(crate) fn insert_node(&mut self, path: &str, node: Arc<FileNode>) -> VfsResult<()> {
        if node.kind().is_dir() {
            self.mkdir_all(path, node.perm())?;
            return Ok(());
        }
        self.link(path, node)
    }

    /// Ensure a directory exists at `path`, creating missing parents. A
    /// no-op when a directory is already present; an existing non-directory
    /// is an error.
    pub(crate) fn mkdir_all(&mut self, path: &str, perm: u32) -> VfsResult<()> {
        if let Some(existing) = self.files.get(path) {
            if existing.kind().is_dir() {
                return Ok(());
            }
            return Err(VfsError::AlreadyExists(path.to_string()));
        }
        let node = FileNode::new_dir(path::basename(path), perm);
        self.link(path, node)
    }

    /// Insert `node` at `path` and index it under its parent, creating the
    /// parent chain on the way up.
    fn link(&mut self, path: &str, node: Arc<FileNode>) -> VfsResult<()> {
        if path == path::ROOT {
            return Err(VfsError::InvalidPath("cannot create the root".into()));
        }
        let parent = path::parent(path);
        if parent != path::ROOT {
            self.mkdir_all(&parent, 0o755)?;
        }
        self.files.insert(path.to_string(), node.clone());
        self.children
            .entry(parent)
            .or_default()
            .insert(node.name(), node);
        Ok(())
    }

    /// Unlink `path` from its parent's child index.
    fn unlink(&mut self, path: &str) {
        let parent = path::parent(path);
        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.remove(path::basename(path));
            if siblings.is_empty() {
                self.children.remove(&parent);
            }
        }
    }

    /// Move `from` to `to`, carrying every descendant path along and
    /// rewriting its stored name and index slot. An existing entry at `to`
    /// is replaced.
    pub(crate) fn rename(&mut self, from: &str, to: &str) -> VfsResult<()> {
        let node = self
            .files
            .get(from)
            .cloned()
            .ok_or_else(|| VfsError::NotFound(from.to_string()))?;

        let mut moves: Vec<(String, String)> = vec![(from.to_string(), to.to_string())];
        for p in self.files.keys() {
            if p != from && path::is_under(p, from) {
                let rel = &p[from.len()..];
                moves.push((p.clone(), format!("{to}{rel}")));
            }
        }

        self.unlink(from);
        for (old, new) in &moves {
            if let Some(n) = self.files.remove(old) {
                n.set_name(path::basename(new));
                self.files.insert(new.clone(), n);
            }
            if let Some(kids) = self.children.remove(old) {
                self.children.insert(new.clone(), kids);
            }
        }

        // Link the moved root under its new parent.
        let parent = path::parent(to);
        if parent != path::ROOT {
            self.mkdir_all(&parent, 0o755)?;
        }
        node.set_name(path::basename(to));
        self.children
            .entry(parent)
            .or_default()
            .insert(node.name(), node);
        Ok(())
    }

    /// Remove `path`. Directories must be empty.
    pub(crate) fn remove(&mut self, path: &str) -> VfsResult<()> {
        let node = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| VfsError::NotFound(path.to_string()))?;

        if node.kind() == FileKind::Directory
            && self.children.get(path).map(|m| !m.is_empty()).unwrap_or(false)
        {
            return Err(VfsError::DirectoryNotEmpty(path.to_string()));
        }

        self.children.remove(path);
        self.files.remove(path);
        self.unlink(path);
        Ok(())
    }
}
