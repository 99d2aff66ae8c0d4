//! File nodes and open handles.
//!
//! The tree owns one canonical [`FileNode`] per path. Opening a path
//! duplicates it into a [`FileHandle`] with its own cursor and flags over the
//! node's shared content buffer: writes through any handle persist the buffer
//! to the content store and update the node's content identifier, so they are
//! visible to every other handle and to any later open of the same path.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use crate::store::{ContentId, ContentStore};
use crate::{VfsError, VfsResult};

/// What a path tree entry is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
}

impl FileKind {
    pub fn is_dir(self) -> bool {
        self == FileKind::Directory
    }

    pub fn is_symlink(self) -> bool {
        self == FileKind::Symlink
    }
}

/// Open flags, in the style of `std::fs::OpenOptions`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
    pub exclusive: bool,
}

impl OpenFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only, as used by `open`.
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Read-write with create and truncate, as used by `create`.
    pub fn create_rw() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }

    pub fn read(mut self, yes: bool) -> Self {
        self.read = yes;
        self
    }

    pub fn write(mut self, yes: bool) -> Self {
        self.write = yes;
        self
    }

    pub fn create(mut self, yes: bool) -> Self {
        self.create = yes;
        self
    }

    pub fn truncate(mut self, yes: bool) -> Self {
        self.truncate = yes;
        self
    }

    pub fn append(mut self, yes: bool) -> Self {
        self.append = yes;
        self
    }

    pub fn exclusive(mut self, yes: bool) -> Self {
        self.exclusive = yes;
        self
    }

    pub fn readable(&self) -> bool {
        self.read
    }

    pub fn writable(&self) -> bool {
        self.write || self.append
    }
}

/// Stat result for a path or handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub size: u64,
    pub kind: FileKind,
    pub perm: u32,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// Shared content buffer. `loaded` distinguishes "nothing buffered yet"
/// (fault contents in from the store on first read) from a genuinely empty
/// buffer such as a fresh or truncated file.
#[derive(Debug, Default)]
struct ContentBuf {
    bytes: Vec<u8>,
    loaded: bool,
}

/// Canonical entry for one path in the tree. Symlink targets are stored as
/// the node's content.
#[derive(Debug)]
pub(crate) struct FileNode {
    name: Mutex<String>,
    kind: FileKind,
    perm: u32,
    content: Mutex<ContentBuf>,
    content_id: Mutex<Option<ContentId>>,
}

impl FileNode {
    pub(crate) fn new_file(name: &str, perm: u32) -> Arc<Self> {
        Arc::new(Self {
            name: Mutex::new(name.to_string()),
            kind: FileKind::Regular,
            perm,
            content: Mutex::new(ContentBuf {
                bytes: Vec::new(),
                loaded: true,
            }),
            content_id: Mutex::new(None),
        })
    }

    pub(crate) fn new_dir(name: &str, perm: u32) -> Arc<Self> {
        Arc::new(Self {
            name: Mutex::new(name.to_string()),
            kind: FileKind::Directory,
            perm,
            content: Mutex::new(ContentBuf {
                bytes: Vec::new(),
                loaded: true,
            }),
            content_id: Mutex::new(None),
        })
    }

    pub(crate) fn new_symlink(name: &str, target: &str) -> Arc<Self> {
        Arc::new(Self {
            name: Mutex::new(name.to_string()),
            kind: FileKind::Symlink,
            perm: 0o777,
            content: Mutex::new(ContentBuf {
                bytes: target.as_bytes().to_vec(),
                loaded: true,
            }),
            content_id: Mutex::new(None),
        })
    }

    /// Rebuild a node from a snapshot: the content identifier is known but
    /// the buffer is faulted in from the store on first read.
    pub(crate) fn from_content_id(
        name: &str,
        kind: FileKind,
        perm: u32,
        content_id: Option<ContentId>,
    ) -> Arc<Self> {
        let loaded = content_id.is_none();
        Arc::new(Self {
            name: Mutex::new(name.to_string()),
            kind,
            perm,
            content: Mutex::new(ContentBuf {
                bytes: Vec::new(),
                loaded,
            }),
            content_id: Mutex::new(content_id),
        })
    }

    pub(crate) fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.lock().unwrap() = name.to_string();
    }

    pub(crate) fn kind(&self) -> FileKind {
        self.kind
    }

    pub(crate) fn perm(&self) -> u32 {
        self.perm
    }

    pub(crate) fn content_id(&self) -> Option<ContentId> {
        self.content_id.lock().unwrap().clone()
    }

    /// Symlink target, valid only for `FileKind::Symlink` nodes.
    pub(crate) fn link_target(&self) -> String {
        String::from_utf8_lossy(&self.content.lock().unwrap().bytes).into_owned()
    }

    pub(crate) fn stat(&self) -> Metadata {
        Metadata {
            name: self.name(),
            size: self.content.lock().unwrap().bytes.len() as u64,
            kind: self.kind,
            perm: self.perm,
        }
    }

    fn clear_content(&self) {
        let mut buf = self.content.lock().unwrap();
        buf.bytes.clear();
        buf.loaded = true;
    }

    /// Fault the buffer in from the store if a content id exists and nothing
    /// has been buffered yet.
    fn fault_in(&self, store: &dyn ContentStore) -> VfsResult<()> {
        let mut buf = self.content.lock().unwrap();
        if buf.loaded {
            return Ok(());
        }
        if let Some(id) = self.content_id.lock().unwrap().as_ref() {
            buf.bytes = store.get(id)?;
        }
        buf.loaded = true;
        Ok(())
    }
}

/// An open view over a path tree entry: independent cursor and flags,
/// shared content.
pub struct FileHandle {
    path: String,
    node: Arc<FileNode>,
    flags: OpenFlags,
    pos: u64,
    closed: bool,
    store: Arc<dyn ContentStore>,
}

impl FileHandle {
    pub(crate) fn duplicate(
        path: &str,
        node: Arc<FileNode>,
        flags: OpenFlags,
        store: Arc<dyn ContentStore>,
    ) -> Self {
        if flags.truncate {
            node.clear_content();
        }
        let pos = if flags.append {
            node.content.lock().unwrap().bytes.len() as u64
        } else {
            0
        };
        Self {
            path: path.to_string(),
            node,
            flags,
            pos,
            closed: false,
            store,
        }
    }

    /// The path this handle was opened at.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> String {
        self.node.name()
    }

    /// The node's current content identifier, if any write has persisted it.
    pub fn content_id(&self) -> Option<ContentId> {
        self.node.content_id()
    }

    pub fn stat(&self) -> VfsResult<Metadata> {
        self.check_open()?;
        Ok(self.node.stat())
    }

    fn check_open(&self) -> VfsResult<()> {
        if self.closed {
            return Err(VfsError::Closed(self.path.clone()));
        }
        Ok(())
    }

    /// Read from the cursor. Returns `Ok(0)` at end of content.
    pub fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Read at an absolute offset without moving the cursor. Reads past the
    /// end of content return `Ok(0)`; partial reads return the partial count.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        self.check_open()?;
        if !self.flags.readable() {
            return Err(VfsError::PermissionDenied {
                path: self.path.clone(),
                op: "read",
            });
        }
        self.node.fault_in(self.store.as_ref())?;

        let content = self.node.content.lock().unwrap();
        let size = content.bytes.len() as u64;
        if offset >= size {
            return Ok(0);
        }
        let avail = (size - offset) as usize;
        let n = buf.len().min(avail);
        buf[..n].copy_from_slice(&content.bytes[offset as usize..offset as usize + n]);
        Ok(n)
    }

    /// Write at the cursor and advance it. The new buffer is persisted to
    /// the content store and the node's content identifier is updated before
    /// this returns.
    pub fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        let n = self.write_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Write at an absolute offset, zero-filling any gap past the current
    /// end, then persist.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> VfsResult<usize> {
        self.check_open()?;
        if !self.flags.writable() {
            return Err(VfsError::PermissionDenied {
                path: self.path.clone(),
                op: "write",
            });
        }

        let id = {
            let mut content = self.node.content.lock().unwrap();
            let off = offset as usize;
            if off > content.bytes.len() {
                content.bytes.resize(off, 0);
            }
            let end = off + buf.len();
            if end > content.bytes.len() {
                content.bytes.resize(end, 0);
            }
            content.bytes[off..end].copy_from_slice(buf);
            content.loaded = true;
            self.store.put(&content.bytes)?
        };

        *self.node.content_id.lock().unwrap() = Some(id);
        Ok(buf.len())
    }

    pub fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        self.check_open()?;
        let size = self.node.content.lock().unwrap().bytes.len() as i64;
        let next = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => self.pos as i64 + n,
            SeekFrom::End(n) => size + n,
        };
        if next < 0 {
            return Err(VfsError::InvalidPath(format!(
                "seek before start of {}",
                self.path
            )));
        }
        self.pos = next as u64;
        Ok(self.pos)
    }

    /// Grow (zero-filled) or shrink the shared buffer. The persisted content
    /// identifier is untouched until the next write.
    pub fn truncate(&self, size: u64) -> VfsResult<()> {
        self.check_open()?;
        let mut content = self.node.content.lock().unwrap();
        content.bytes.resize(size as usize, 0);
        content.loaded = true;
        Ok(())
    }

    pub fn close(&mut self) -> VfsResult<()> {
        self.check_open()?;
        self.closed = true;
        Ok(())
    }
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        FileHandle::read(self, buf).map_err(Into::into)
    }
}

impl Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FileHandle::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Writes persist synchronously; nothing is buffered in the handle.
        Ok(())
    }
}

impl Seek for FileHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        FileHandle::seek(self, pos).map_err(Into::into)
    }
}
