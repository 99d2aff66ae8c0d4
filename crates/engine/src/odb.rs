//! The loose object database.
//!
//! Objects live at `objects/<first two hex>/<remaining 38>` beneath the
//! repository root, zlib-deflated with the `"<type> <len>\0"` header
//! prepended before compression. Writes are idempotent: content addressing
//! makes an already-present object a no-op.

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use anchorgit_vfs::{Fs, VfsError};

use crate::object::{Commit, ObjectId, ObjectKind, Tree};
use crate::{EngineError, EngineResult};

#[derive(Clone)]
pub struct Odb {
    fs: Arc<dyn Fs>,
}

impl Odb {
    pub fn new(fs: Arc<dyn Fs>) -> Self {
        Self { fs }
    }

    fn object_path(id: &ObjectId) -> String {
        let hex = id.to_hex();
        format!("objects/{}/{}", &hex[..2], &hex[2..])
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.fs.stat(&Self::object_path(id)).is_ok()
    }

    /// Store an object, returning its id.
    pub fn write(&self, kind: ObjectKind, body: &[u8]) -> EngineResult<ObjectId> {
        let id = ObjectId::hash(kind, body);
        if self.contains(&id) {
            return Ok(id);
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(format!("{} {}\0", kind.as_str(), body.len()).as_bytes())
            .and_then(|_| encoder.write_all(body))
            .map_err(|e| EngineError::Corrupt(format!("deflate failed: {e}")))?;
        let deflated = encoder
            .finish()
            .map_err(|e| EngineError::Corrupt(format!("deflate failed: {e}")))?;

        let mut file = self.fs.create(&Self::object_path(&id))?;
        file.write(&deflated)?;
        Ok(id)
    }

    /// Read an object's kind and payload.
    pub fn read(&self, id: &ObjectId) -> EngineResult<(ObjectKind, Vec<u8>)> {
        let mut file = match self.fs.open(&Self::object_path(id)) {
            Ok(f) => f,
            Err(VfsError::NotFound(_)) => {
                return Err(EngineError::ObjectNotFound(id.to_hex()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut deflated = Vec::new();
        Read::read_to_end(&mut file, &mut deflated)
            .map_err(|e| EngineError::Corrupt(format!("read object {id}: {e}")))?;

        let mut raw = Vec::new();
        ZlibDecoder::new(&deflated[..])
            .read_to_end(&mut raw)
            .map_err(|e| EngineError::Corrupt(format!("inflate object {id}: {e}")))?;

        let nul = raw
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| EngineError::Corrupt(format!("object {id} missing header")))?;
        let header = std::str::from_utf8(&raw[..nul])
            .map_err(|_| EngineError::Corrupt(format!("object {id} header is not utf-8")))?;
        let (kind, len) = header
            .split_once(' ')
            .ok_or_else(|| EngineError::Corrupt(format!("object {id} malformed header")))?;
        let kind = ObjectKind::from_str(kind)?;
        let len: usize = len
            .parse()
            .map_err(|_| EngineError::Corrupt(format!("object {id} malformed length")))?;

        let body = raw[nul + 1..].to_vec();
        if body.len() != len {
            return Err(EngineError::Corrupt(format!(
                "object {id} length mismatch: header {len}, payload {}",
                body.len()
            )));
        }
        Ok((kind, body))
    }

    /// Read and decode a commit.
    pub fn commit(&self, id: &ObjectId) -> EngineResult<Commit> {
        match self.read(id)? {
            (ObjectKind::Commit, body) => Commit::decode(&body),
            (kind, _) => Err(EngineError::Corrupt(format!(
                "expected commit at {id}, found {}",
                kind.as_str()
            ))),
        }
    }

    /// Read and decode a tree.
    pub fn tree(&self, id: &ObjectId) -> EngineResult<Tree> {
        match self.read(id)? {
            (ObjectKind::Tree, body) => Tree::decode(&body),
            (kind, _) => Err(EngineError::Corrupt(format!(
                "expected tree at {id}, found {}",
                kind.as_str()
            ))),
        }
    }

    /// Read a blob's content.
    pub fn blob(&self, id: &ObjectId) -> EngineResult<Vec<u8>> {
        match self.read(id)? {
            (ObjectKind::Blob, body) => Ok(body),
            (kind, _) => Err(EngineError::Corrupt(format!(
                "expected blob at {id}, found {}",
                kind.as_str()
            ))),
        }
    }
}
