use anchorgit_engine::EngineError;
use anchorgit_vfs::VfsError;

use crate::pinner::PinError;

/// Errors surfaced by the hosting pipeline.
///
/// Propagation policy: filesystem, engine, and session errors reach the HTTP
/// boundary as 500s (403 is reserved for an unsupported service name);
/// pipeline errors during event-driven provisioning are logged and the event
/// is dropped; pipeline errors during post-push anchoring fail the push
/// response even though the pack was already applied.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("repository {0} not found")]
    RepoNotFound(String),
    #[error("repository {0} already exists")]
    RepoAlreadyExists(String),
    #[error("invalid repository name {0:?}")]
    InvalidRepoName(String),
    #[error("repository {0} is not ready for sessions")]
    RepoNotReady(String),
    #[error("unsupported git service {0:?}")]
    UnsupportedSessionKind(String),
    #[error("failed to provision repository {name}: {source}")]
    Provisioning {
        name: String,
        #[source]
        source: EngineError,
    },
    #[error("failed to decode request: {0}")]
    Decode(#[source] EngineError),
    #[error("failed to apply pack: {0}")]
    PackApplication(#[source] EngineError),
    #[error("failed to build repository manifest: {0}")]
    ManifestBuild(#[source] EngineError),
    #[error("failed to pin {name}: {source}")]
    Pin {
        name: String,
        #[source]
        source: PinError,
    },
    #[error("failed to sign anchor transaction: {0}")]
    Sign(String),
    #[error("failed to submit anchor transaction: {0}")]
    Submit(String),
    #[error("ledger subscription failed: {0}")]
    Subscribe(String),
    #[error("invalid signer key: {0}")]
    SignerKey(String),
    #[error("failed to serialize repository metadata: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
    #[error("filesystem: {0}")]
    Vfs(#[from] VfsError),
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

pub type GitResult<T> = std::result::Result<T, GitError>;
