//! # anchorgit core
//!
//! The hosting pipeline behind anchorgit: repository lifecycle, protocol
//! sessions, and metadata anchoring.
//!
//! Repositories are provisioned from ledger-emitted creation events into
//! subtrees of a content-addressed virtual filesystem. Inbound Git smart
//! HTTP requests are served through per-repository protocol sessions; after
//! every push the repository's tree and commit provenance are captured in a
//! manifest, pinned to the content store, and the resulting content id is
//! anchored on the ledger with a signed transaction.
//!
//! **No API concerns**: HTTP routing and serving belong to `api-rest`;
//! process startup and configuration loading belong to the run binary.

pub mod config;
pub mod error;
pub mod ledger;
pub mod manifest;
pub mod pinner;
pub mod registry;
pub mod repo;
pub mod service;
pub mod session;
pub mod signer;

pub use config::CoreConfig;
pub use error::{GitError, GitResult};
pub use ledger::{
    ChannelLedger, EventSubscription, LedgerClient, RepositoryCreatedEvent, SubscriptionError,
    TxHash,
};
pub use manifest::{FileRecord, RepoManifest, REPO_CREATED_MARKER};
pub use pinner::{HttpPinner, PinError, Pinner, StorePinner};
pub use registry::RepoRegistry;
pub use repo::{OwnerAddress, Repo, RepoId, RepoSpec, RepoState};
pub use service::GitService;
pub use session::SessionKind;
pub use signer::{AnchorTx, Signer};
