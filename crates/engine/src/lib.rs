//! # anchorgit engine
//!
//! The version-control engine behind the anchorgit session adapter. It
//! operates purely through the [`Fs`](anchorgit_vfs::Fs) contract — never the
//! OS filesystem — so repositories live wherever the virtual filesystem puts
//! them, which for anchorgit is a content-addressable store.
//!
//! The engine covers the subset of Git the hosting pipeline needs:
//!
//! - a loose object database (zlib-deflated, SHA-1 addressed) with the
//!   blob/tree/commit object model,
//! - refs and a symbolic `HEAD` (unborn `HEAD` is a first-class state),
//! - history queries: head, commit lookup, commit count, last commit, and
//!   the last commit touching a given path,
//! - pack encoding/decoding (including offset and reference deltas),
//! - the three smart HTTP v0 operations: reference advertisement,
//!   upload-pack, and receive-pack,
//! - a clone client that fetches an existing repository over smart HTTP
//!   into a fresh object database.

mod client;
mod object;
mod odb;
pub mod pack;
pub mod pktline;
mod protocol;
mod refs;
mod repo;

pub use client::clone_from;
pub use object::{Commit, ObjectId, ObjectKind, Signature, Tree, TreeEntry, TreeEntryMode};
pub use odb::Odb;
pub use protocol::{advertise_refs, receive_pack, upload_pack, ServiceKind};
pub use refs::Reference;
pub use repo::{FileEntry, Repository, DEFAULT_BRANCH, HEAD_REF};

use anchorgit_vfs::VfsError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("filesystem: {0}")]
    Vfs(#[from] VfsError),
    #[error("object {0} not found")]
    ObjectNotFound(String),
    #[error("corrupt object: {0}")]
    Corrupt(String),
    #[error("repository already initialized")]
    AlreadyInitialized,
    #[error("not a repository")]
    NotARepository,
    #[error("malformed pack: {0}")]
    BadPack(String),
    #[error("malformed protocol request: {0}")]
    BadRequest(String),
    #[error("origin fetch failed: {0}")]
    OriginFetch(#[from] reqwest::Error),
    #[error("origin sent an unusable response: {0}")]
    OriginResponse(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
