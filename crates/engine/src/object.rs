//! The Git object model: identifiers, blobs, trees, and commits, with their
//! canonical wire encodings.
//!
//! An object's identifier is the SHA-1 of `"<type> <len>\0"` followed by the
//! payload. Tree entries are ordered the way Git orders them: by name bytes,
//! with directory names compared as if they carried a trailing `/`.

use std::fmt;

use sha1::{Digest, Sha1};

use crate::{EngineError, EngineResult};

/// A 20-byte SHA-1 object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// The all-zero id used by the wire protocol for "no object"
    /// (ref creation and deletion commands).
    pub const ZERO: ObjectId = ObjectId([0; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> EngineResult<Self> {
        let raw = hex::decode(s.trim())
            .map_err(|_| EngineError::Corrupt(format!("invalid object id {s:?}")))?;
        let arr: [u8; 20] = raw
            .try_into()
            .map_err(|_| EngineError::Corrupt(format!("invalid object id length in {s:?}")))?;
        Ok(Self(arr))
    }

    /// Hash `body` as an object of the given kind.
    pub fn hash(kind: ObjectKind, body: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(format!("{} {}\0", kind.as_str(), body.len()).as_bytes());
        hasher.update(body);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    pub fn from_str(s: &str) -> EngineResult<Self> {
        match s {
            "commit" => Ok(Self::Commit),
            "tree" => Ok(Self::Tree),
            "blob" => Ok(Self::Blob),
            "tag" => Ok(Self::Tag),
            other => Err(EngineError::Corrupt(format!("unknown object type {other:?}"))),
        }
    }

    /// Pack entry type code.
    pub fn pack_code(self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    pub fn from_pack_code(code: u8) -> EngineResult<Self> {
        match code {
            1 => Ok(Self::Commit),
            2 => Ok(Self::Tree),
            3 => Ok(Self::Blob),
            4 => Ok(Self::Tag),
            other => Err(EngineError::BadPack(format!(
                "unknown pack object type {other}"
            ))),
        }
    }
}

/// Entry modes Git stores in tree objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeEntryMode {
    Regular,
    Executable,
    Symlink,
    Directory,
}

impl TreeEntryMode {
    /// The octal form written into tree payloads (no leading zero for
    /// directories, per the format).
    pub fn as_octal(self) -> &'static str {
        match self {
            Self::Regular => "100644",
            Self::Executable => "100755",
            Self::Symlink => "120000",
            Self::Directory => "40000",
        }
    }

    pub fn from_octal(s: &str) -> EngineResult<Self> {
        match s {
            "100644" | "100664" => Ok(Self::Regular),
            "100755" => Ok(Self::Executable),
            "120000" => Ok(Self::Symlink),
            "40000" | "040000" => Ok(Self::Directory),
            other => Err(EngineError::Corrupt(format!("unknown tree mode {other:?}"))),
        }
    }

    pub fn is_dir(self) -> bool {
        self == Self::Directory
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: TreeEntryMode,
    pub name: String,
    pub id: ObjectId,
}

impl TreeEntry {
    /// Git's tree ordering key: directory names sort as `name/`.
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.mode.is_dir() {
            key.push(b'/');
        }
        key
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by_key(|e| e.sort_key());
        Self { entries }
    }

    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for e in &self.entries {
            out.extend_from_slice(e.mode.as_octal().as_bytes());
            out.push(b' ');
            out.extend_from_slice(e.name.as_bytes());
            out.push(0);
            out.extend_from_slice(e.id.as_bytes());
        }
        out
    }

    pub fn decode(body: &[u8]) -> EngineResult<Self> {
        let mut entries = Vec::new();
        let mut rest = body;
        while !rest.is_empty() {
            let space = rest
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| EngineError::Corrupt("tree entry missing mode".into()))?;
            let mode = TreeEntryMode::from_octal(std::str::from_utf8(&rest[..space]).map_err(
                |_| EngineError::Corrupt("tree entry mode is not utf-8".into()),
            )?)?;
            rest = &rest[space + 1..];

            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| EngineError::Corrupt("tree entry missing name".into()))?;
            let name = String::from_utf8(rest[..nul].to_vec())
                .map_err(|_| EngineError::Corrupt("tree entry name is not utf-8".into()))?;
            rest = &rest[nul + 1..];

            if rest.len() < 20 {
                return Err(EngineError::Corrupt("tree entry truncated id".into()));
            }
            let mut raw = [0u8; 20];
            raw.copy_from_slice(&rest[..20]);
            rest = &rest[20..];

            entries.push(TreeEntry {
                mode,
                name,
                id: ObjectId::from_bytes(raw),
            });
        }
        Ok(Self { entries })
    }
}

/// An author/committer line: identity plus seconds since the epoch and a
/// timezone offset kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub when: i64,
    pub tz: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, when: i64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            when,
            tz: "+0000".to_string(),
        }
    }

    fn encode(&self) -> String {
        format!("{} <{}> {} {}", self.name, self.email, self.when, self.tz)
    }

    fn decode(s: &str) -> EngineResult<Self> {
        let corrupt = || EngineError::Corrupt(format!("malformed signature line {s:?}"));
        let (rest, tz) = s.rsplit_once(' ').ok_or_else(corrupt)?;
        let (ident, when) = rest.rsplit_once(' ').ok_or_else(corrupt)?;
        let when: i64 = when.parse().map_err(|_| corrupt())?;
        let open = ident.rfind('<').ok_or_else(corrupt)?;
        let close = ident.rfind('>').ok_or_else(corrupt)?;
        if close < open {
            return Err(corrupt());
        }
        Ok(Self {
            name: ident[..open].trim_end().to_string(),
            email: ident[open + 1..close].to_string(),
            when,
            tz: tz.to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl Commit {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("tree {}\n", self.tree));
        for p in &self.parents {
            out.push_str(&format!("parent {p}\n"));
        }
        out.push_str(&format!("author {}\n", self.author.encode()));
        out.push_str(&format!("committer {}\n", self.committer.encode()));
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    pub fn decode(body: &[u8]) -> EngineResult<Self> {
        let text = std::str::from_utf8(body)
            .map_err(|_| EngineError::Corrupt("commit is not utf-8".into()))?;
        let (headers, message) = text
            .split_once("\n\n")
            .ok_or_else(|| EngineError::Corrupt("commit missing header separator".into()))?;

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        for line in headers.lines() {
            // Continuation lines belong to multi-line headers (gpgsig); the
            // queries here never need their contents.
            if line.starts_with(' ') {
                continue;
            }
            let Some((key, value)) = line.split_once(' ') else {
                continue;
            };
            match key {
                "tree" => tree = Some(ObjectId::from_hex(value)?),
                "parent" => parents.push(ObjectId::from_hex(value)?),
                "author" => author = Some(Signature::decode(value)?),
                "committer" => committer = Some(Signature::decode(value)?),
                _ => {}
            }
        }

        Ok(Self {
            tree: tree.ok_or_else(|| EngineError::Corrupt("commit missing tree".into()))?,
            parents,
            author: author.ok_or_else(|| EngineError::Corrupt("commit missing author".into()))?,
            committer: committer
                .ok_or_else(|| EngineError::Corrupt("commit missing committer".into()))?,
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_ids_match_git() {
        // `echo -n 'hello' | git hash-object --stdin`
        assert_eq!(
            ObjectId::hash(ObjectKind::Blob, b"hello").to_hex(),
            "b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0"
        );
        // Empty blob.
        assert_eq!(
            ObjectId::hash(ObjectKind::Blob, b"").to_hex(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }

    #[test]
    fn tree_round_trip_preserves_entries() {
        let tree = Tree::new(vec![
            TreeEntry {
                mode: TreeEntryMode::Directory,
                name: "src".into(),
                id: ObjectId::hash(ObjectKind::Blob, b"x"),
            },
            TreeEntry {
                mode: TreeEntryMode::Regular,
                name: "README.md".into(),
                id: ObjectId::hash(ObjectKind::Blob, b"y"),
            },
        ]);
        let decoded = Tree::decode(&tree.encode()).unwrap();
        assert_eq!(decoded, tree);
    }

    #[test]
    fn tree_orders_directories_with_trailing_slash() {
        // "a.txt" < "a/" < "ab" in git's ordering.
        let tree = Tree::new(vec![
            TreeEntry {
                mode: TreeEntryMode::Regular,
                name: "ab".into(),
                id: ObjectId::ZERO,
            },
            TreeEntry {
                mode: TreeEntryMode::Directory,
                name: "a".into(),
                id: ObjectId::ZERO,
            },
            TreeEntry {
                mode: TreeEntryMode::Regular,
                name: "a.txt".into(),
                id: ObjectId::ZERO,
            },
        ]);
        let names: Vec<&str> = tree.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "a", "ab"]);
    }

    #[test]
    fn commit_round_trip() {
        let commit = Commit {
            tree: ObjectId::hash(ObjectKind::Tree, b""),
            parents: vec![ObjectId::hash(ObjectKind::Commit, b"p")],
            author: Signature::new("Alice", "alice@example.com", 1_700_000_000),
            committer: Signature::new("Alice", "alice@example.com", 1_700_000_001),
            message: "add README\n".into(),
        };
        let decoded = Commit::decode(&commit.encode()).unwrap();
        assert_eq!(decoded, commit);
    }

    #[test]
    fn commit_decode_skips_unknown_and_multiline_headers() {
        let body = b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
author A <a@x> 1 +0000\n\
committer A <a@x> 1 +0000\n\
gpgsig -----BEGIN-----\n\
 line two\n\
 -----END-----\n\
\n\
msg";
        let commit = Commit::decode(body).unwrap();
        assert_eq!(commit.message, "msg");
        assert!(commit.parents.is_empty());
    }
}
