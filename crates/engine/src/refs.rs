//! References and the symbolic `HEAD`.
//!
//! A ref is a file under `refs/` holding a hex object id; `HEAD` holds a
//! `ref: <name>` line. A repository whose `HEAD` target has no ref file yet
//! is unborn — a legal state for a freshly created, never-pushed repository.

use std::io::Read;
use std::sync::Arc;

use anchorgit_vfs::{Fs, VfsError};

use crate::object::ObjectId;
use crate::{EngineError, EngineResult};

const HEAD_FILE: &str = "HEAD";

/// A resolved reference: full name plus the commit it points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub id: ObjectId,
}

#[derive(Clone)]
pub(crate) struct RefStore {
    fs: Arc<dyn Fs>,
}

impl RefStore {
    pub(crate) fn new(fs: Arc<dyn Fs>) -> Self {
        Self { fs }
    }

    fn read_file(&self, path: &str) -> EngineResult<Option<String>> {
        let mut file = match self.fs.open(path) {
            Ok(f) => f,
            Err(VfsError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut text = String::new();
        Read::read_to_string(&mut file, &mut text)
            .map_err(|e| EngineError::Corrupt(format!("read {path}: {e}")))?;
        Ok(Some(text))
    }

    /// The ref name `HEAD` points at.
    pub(crate) fn head_target(&self) -> EngineResult<String> {
        let text = self
            .read_file(HEAD_FILE)?
            .ok_or(EngineError::NotARepository)?;
        let target = text
            .strip_prefix("ref: ")
            .ok_or_else(|| EngineError::Corrupt("HEAD is not a symbolic ref".into()))?;
        Ok(target.trim().to_string())
    }

    pub(crate) fn set_head_target(&self, name: &str) -> EngineResult<()> {
        let mut file = self.fs.create(HEAD_FILE)?;
        file.write(format!("ref: {name}\n").as_bytes())?;
        Ok(())
    }

    pub(crate) fn head_exists(&self) -> bool {
        self.fs.stat(HEAD_FILE).is_ok()
    }

    pub(crate) fn read(&self, name: &str) -> EngineResult<Option<ObjectId>> {
        match self.read_file(name)? {
            Some(text) => Ok(Some(ObjectId::from_hex(&text)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn write(&self, name: &str, id: &ObjectId) -> EngineResult<()> {
        let mut file = self.fs.create(name)?;
        file.write(format!("{}\n", id.to_hex()).as_bytes())?;
        Ok(())
    }

    pub(crate) fn delete(&self, name: &str) -> EngineResult<()> {
        match self.fs.remove(name) {
            Ok(()) | Err(VfsError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All refs under `refs/`, sorted by name.
    pub(crate) fn list(&self) -> EngineResult<Vec<Reference>> {
        let mut out = Vec::new();
        self.walk("refs", &mut out)?;
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn walk(&self, dir: &str, out: &mut Vec<Reference>) -> EngineResult<()> {
        for entry in self.fs.read_dir(dir)? {
            let path = format!("{dir}/{}", entry.name);
            if entry.is_dir() {
                self.walk(&path, out)?;
            } else if let Some(id) = self.read(&path)? {
                out.push(Reference { name: path, id });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;
    use anchorgit_vfs::{MemoryStore, Vfs};

    fn store() -> RefStore {
        RefStore::new(Arc::new(Vfs::new(Arc::new(MemoryStore::new()))))
    }

    #[test]
    fn head_round_trip() {
        let refs = store();
        refs.set_head_target("refs/heads/main").unwrap();
        assert_eq!(refs.head_target().unwrap(), "refs/heads/main");
    }

    #[test]
    fn unborn_ref_reads_as_none() {
        let refs = store();
        assert_eq!(refs.read("refs/heads/main").unwrap(), None);
    }

    #[test]
    fn list_walks_nested_refs_sorted() {
        let refs = store();
        let id = ObjectId::hash(ObjectKind::Blob, b"x");
        refs.write("refs/heads/main", &id).unwrap();
        refs.write("refs/heads/feature/one", &id).unwrap();
        refs.write("refs/tags/v1", &id).unwrap();

        let names: Vec<String> = refs.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec!["refs/heads/feature/one", "refs/heads/main", "refs/tags/v1"]
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let refs = store();
        let id = ObjectId::hash(ObjectKind::Blob, b"x");
        refs.write("refs/heads/main", &id).unwrap();
        refs.delete("refs/heads/main").unwrap();
        refs.delete("refs/heads/main").unwrap();
        assert_eq!(refs.read("refs/heads/main").unwrap(), None);
    }
}
