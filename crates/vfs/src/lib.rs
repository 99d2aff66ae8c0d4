//! # anchorgit VFS
//!
//! A virtual filesystem whose file contents live on a content-addressable
//! store instead of a local disk. It presents a conventional hierarchical
//! file API (open/read/write/seek/rename/remove/symlink/list) so that a
//! version-control object store can use it as if it were a directory tree.
//!
//! ## Model
//!
//! - The path tree maps normalized paths to canonical file nodes and keeps
//!   a parent → children index for directory listing. Creating a file
//!   materializes any missing parent directories.
//! - Every successful open returns a *duplicate* handle: an independent
//!   cursor and flag set over the node's shared content buffer. Writes
//!   through any handle persist the buffer to the content store and update
//!   the node's content identifier, so a freshly opened handle on the same
//!   path observes them immediately.
//! - Every write is durable-to-content-store before it returns; there is no
//!   background flush.
//!
//! ## Durability
//!
//! The path tree itself is in-memory only; the content store is the durable
//! layer. [`Vfs::snapshot`] captures the tree's shape and content ids so a
//! tree can be rebuilt over the same store, but nothing is persisted
//! automatically.

mod chroot;
mod file;
mod fs;
pub mod path;
mod store;
mod tree;

pub use chroot::ChrootFs;
pub use file::{FileHandle, FileKind, Metadata, OpenFlags};
pub use fs::{Fs, FsSnapshot, SnapshotEntry, Vfs};
pub use store::{ContentId, ContentStore, HttpStore, MemoryStore, StoreError};

/// Errors surfaced by the virtual filesystem.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("path already exists: {0}")]
    AlreadyExists(String),
    #[error("cannot open directory as a file: {0}")]
    IsADirectory(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("{op} not permitted by open flags on {path}")]
    PermissionDenied { path: String, op: &'static str },
    #[error("file handle is closed: {0}")]
    Closed(String),
    #[error("too many levels of symbolic links resolving {0}")]
    SymlinkLoop(String),
    #[error("not a symlink: {0}")]
    NotSymlink(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("content store: {0}")]
    Store(#[from] StoreError),
}

pub type VfsResult<T> = std::result::Result<T, VfsError>;

impl VfsError {
    /// Map to the closest [`std::io::ErrorKind`] for the `std::io` trait
    /// implementations on [`FileHandle`].
    pub(crate) fn io_kind(&self) -> std::io::ErrorKind {
        use std::io::ErrorKind;
        match self {
            VfsError::NotFound(_) => ErrorKind::NotFound,
            VfsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            VfsError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            VfsError::Closed(_) => ErrorKind::Other,
            VfsError::InvalidPath(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        }
    }
}

impl From<VfsError> for std::io::Error {
    fn from(e: VfsError) -> Self {
        std::io::Error::new(e.io_kind(), e)
    }
}
