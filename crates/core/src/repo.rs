//! The repository model and session adapter.
//!
//! A [`Repo`] binds one ledger-registered repository to a chroot subtree of
//! the shared virtual filesystem and to an engine object store on that
//! subtree. Provisioning moves it Uninitialized → Initializing → Ready;
//! protocol sessions and history queries require Ready.
//!
//! Sessions on one repository are serialized by a per-repository lock: two
//! concurrent pushes would otherwise interleave their writes on the same
//! path tree entries.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use anchorgit_engine::{
    advertise_refs, clone_from, receive_pack, upload_pack, Commit, EngineError, FileEntry,
    ObjectId, Reference, Repository, Tree,
};
use anchorgit_vfs::{path, ChrootFs, ContentId, Fs};

use crate::session::SessionKind;
use crate::{GitError, GitResult};

/// Ledger-side repository identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(pub u64);

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A ledger account address, kept as the opaque string the ledger uses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerAddress(String);

impl OwnerAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to provision a repository.
#[derive(Clone, Debug)]
pub struct RepoSpec {
    pub id: RepoId,
    pub name: String,
    pub description: String,
    pub owner: OwnerAddress,
    /// Origin URL to clone the object graph from, for forks.
    pub fork_from: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepoState {
    Uninitialized,
    Initializing,
    Ready,
}

pub struct Repo {
    pub id: RepoId,
    pub name: String,
    pub description: String,
    pub owner: OwnerAddress,
    pub fork_from: Option<String>,

    /// This repository's view of the shared filesystem.
    fs: Arc<dyn Fs>,
    subtree: String,
    state: Mutex<RepoState>,
    engine: Mutex<Option<Repository>>,
    /// Content id of the last anchored metadata snapshot.
    metadata_cid: Mutex<Option<ContentId>>,
    /// Serializes protocol sessions on this repository.
    session_lock: Mutex<()>,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("owner", &self.owner)
            .field("fork_from", &self.fork_from)
            .field("subtree", &self.subtree)
            .finish_non_exhaustive()
    }
}

impl Repo {
    /// Bind a repository to its subtree under `root` on `host_fs`. The
    /// object store is not touched until [`Repo::provision`].
    pub fn new(spec: RepoSpec, host_fs: Arc<dyn Fs>, root: &str) -> GitResult<Self> {
        validate_name(&spec.name)?;
        let subtree = path::join(root, &spec.name);
        let fs: Arc<dyn Fs> = Arc::new(ChrootFs::new(host_fs, &subtree));
        Ok(Self {
            id: spec.id,
            name: spec.name,
            description: spec.description,
            owner: spec.owner,
            fork_from: spec.fork_from,
            fs,
            subtree,
            state: Mutex::new(RepoState::Uninitialized),
            engine: Mutex::new(None),
            metadata_cid: Mutex::new(None),
            session_lock: Mutex::new(()),
        })
    }

    /// The subtree this repository is confined to on the host filesystem.
    pub fn subtree(&self) -> &str {
        &self.subtree
    }

    pub fn state(&self) -> RepoState {
        *self.state.lock().unwrap()
    }

    pub fn metadata_cid(&self) -> Option<ContentId> {
        self.metadata_cid.lock().unwrap().clone()
    }

    pub fn set_metadata_cid(&self, cid: ContentId) {
        *self.metadata_cid.lock().unwrap() = Some(cid);
    }

    /// Bring the object store up: clone from the fork origin when one is
    /// set, otherwise open an existing store or initialize an empty one.
    ///
    /// A provisioning attempt while another is in flight is rejected;
    /// provisioning an already Ready repository is a no-op. Failures revert
    /// to Uninitialized and surface to the caller.
    pub fn provision(&self) -> GitResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                RepoState::Ready => return Ok(()),
                RepoState::Initializing => {
                    return Err(GitError::RepoNotReady(self.name.clone()))
                }
                RepoState::Uninitialized => *state = RepoState::Initializing,
            }
        }

        let built = self.build_engine();
        let mut state = self.state.lock().unwrap();
        match built {
            Ok(engine) => {
                *self.engine.lock().unwrap() = Some(engine);
                *state = RepoState::Ready;
                tracing::info!(repo = %self.name, subtree = %self.subtree, "repository ready");
                Ok(())
            }
            Err(source) => {
                *state = RepoState::Uninitialized;
                Err(GitError::Provisioning {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    fn build_engine(&self) -> Result<Repository, EngineError> {
        if let Some(origin) = &self.fork_from {
            tracing::info!(repo = %self.name, origin, "cloning fork origin");
            return clone_from(self.fs.clone(), origin);
        }
        if Repository::exists(&self.fs) {
            Repository::open(self.fs.clone())
        } else {
            Repository::init(self.fs.clone())
        }
    }

    fn engine(&self) -> GitResult<Repository> {
        self.engine
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| GitError::RepoNotReady(self.name.clone()))
    }

    /// Open a protocol session of the given kind. Requires Ready; holds the
    /// per-repository session lock for the session's lifetime.
    pub fn session(&self, kind: SessionKind) -> GitResult<ProtocolSession<'_>> {
        let engine = self.engine()?;
        let guard = self.session_lock.lock().unwrap();
        Ok(ProtocolSession {
            repo_name: self.name.clone(),
            kind,
            engine,
            _guard: guard,
        })
    }

    // Read-only history queries used by the anchoring pipeline. Empty
    // history reads as `None`, never as an error.

    pub fn head(&self) -> GitResult<Option<Reference>> {
        Ok(self.engine()?.head()?)
    }

    pub fn commit(&self, id: &ObjectId) -> GitResult<Commit> {
        Ok(self.engine()?.commit(id)?)
    }

    /// The tree of the given commit.
    pub fn tree(&self, commit_id: &ObjectId) -> GitResult<Tree> {
        Ok(self.engine()?.tree(commit_id)?)
    }

    pub fn tree_files(&self, commit_id: &ObjectId) -> GitResult<Vec<FileEntry>> {
        Ok(self.engine()?.tree_files(commit_id)?)
    }

    pub fn blob(&self, id: &ObjectId) -> GitResult<Vec<u8>> {
        Ok(self.engine()?.blob(id)?)
    }

    pub fn commits_count(&self) -> GitResult<usize> {
        Ok(self.engine()?.commits_count()?)
    }

    pub fn last_commit(&self) -> GitResult<Option<(ObjectId, Commit)>> {
        Ok(self.engine()?.last_commit()?)
    }

    pub fn file_last_commit(&self, file: &str) -> GitResult<Option<(ObjectId, Commit)>> {
        Ok(self.engine()?.file_last_commit(file)?)
    }
}

/// One transient protocol session, bound to a single repository and closed
/// when dropped.
pub struct ProtocolSession<'a> {
    repo_name: String,
    kind: SessionKind,
    engine: Repository,
    _guard: MutexGuard<'a, ()>,
}

impl ProtocolSession<'_> {
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// The reference advertisement for this session's service.
    pub fn advertised_refs(&self) -> GitResult<Vec<u8>> {
        Ok(advertise_refs(&self.engine, self.kind.engine_kind())?)
    }

    /// Run fetch negotiation. Only valid on an upload-pack session.
    pub fn upload_pack(&self, request: &[u8]) -> GitResult<Vec<u8>> {
        if self.kind != SessionKind::UploadPack {
            return Err(GitError::UnsupportedSessionKind(self.kind.to_string()));
        }
        tracing::debug!(repo = %self.repo_name, "handling upload-pack");
        upload_pack(&self.engine, request).map_err(map_session_error)
    }

    /// Apply a push. Only valid on a receive-pack session.
    pub fn receive_pack(&self, request: &[u8]) -> GitResult<Vec<u8>> {
        if self.kind != SessionKind::ReceivePack {
            return Err(GitError::UnsupportedSessionKind(self.kind.to_string()));
        }
        tracing::debug!(repo = %self.repo_name, "handling receive-pack");
        receive_pack(&self.engine, request).map_err(map_session_error)
    }
}

fn map_session_error(e: EngineError) -> GitError {
    match e {
        EngineError::BadRequest(_) => GitError::Decode(e),
        EngineError::BadPack(_) => GitError::PackApplication(e),
        other => GitError::Engine(other),
    }
}

fn validate_name(name: &str) -> GitResult<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\0');
    if ok {
        Ok(())
    } else {
        Err(GitError::InvalidRepoName(name.to_string()))
    }
}
