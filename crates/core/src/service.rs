//! The Git hosting service: protocol operations plus the metadata and
//! anchoring pipeline.
//!
//! The anchoring sequence after a push is strictly ordered: generate the
//! manifest, pin file contents, pin the serialized manifest, sign a ledger
//! transaction binding the repository id to the pin's content id, submit.
//! No stage is retried inside a single push; a stage failure fails the
//! request — observably, a push whose pack already applied can still fail
//! on anchoring. Only the subscription transport retries (by
//! resubscribing).

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task;

use anchorgit_vfs::{ContentId, Fs};

use crate::config::CoreConfig;
use crate::ledger::{LedgerClient, RepositoryCreatedEvent};
use crate::manifest::{RepoManifest, REPO_CREATED_MARKER};
use crate::pinner::Pinner;
use crate::registry::RepoRegistry;
use crate::repo::{Repo, RepoId, RepoSpec};
use crate::session::SessionKind;
use crate::signer::Signer;
use crate::{GitError, GitResult};

/// A cheaply clonable handle to the hosting service; clones share the
/// registry, backends, and configuration.
#[derive(Clone)]
pub struct GitService {
    host_fs: Arc<dyn Fs>,
    registry: Arc<RepoRegistry>,
    pinner: Arc<dyn Pinner>,
    signer: Arc<Signer>,
    ledger: Arc<dyn LedgerClient>,
    config: Arc<CoreConfig>,
}

impl GitService {
    pub fn new(
        host_fs: Arc<dyn Fs>,
        pinner: Arc<dyn Pinner>,
        signer: Signer,
        ledger: Arc<dyn LedgerClient>,
        config: CoreConfig,
    ) -> Self {
        Self {
            host_fs,
            registry: Arc::new(RepoRegistry::new()),
            pinner,
            signer: Arc::new(signer),
            ledger,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &RepoRegistry {
        &self.registry
    }

    /// Reference advertisement for `GET /{repo}/info/refs`, prefixed with
    /// the `# service=<name>` marker line and a flush packet.
    pub async fn info_refs(&self, repo_name: &str, kind: SessionKind) -> GitResult<Vec<u8>> {
        let this = self.clone();
        let name = repo_name.to_string();
        run_blocking(move || {
            let repo = this.registry.get(&name)?;
            let session = repo.session(kind)?;
            let advertisement = session.advertised_refs()?;

            let mut body = Vec::new();
            anchorgit_engine::pktline::write_pkt_str(&mut body, &format!("# service={kind}\n"));
            anchorgit_engine::pktline::write_flush(&mut body);
            body.extend_from_slice(&advertisement);
            Ok(body)
        })
        .await
    }

    /// Fetch negotiation for `POST /{repo}/git-upload-pack`.
    pub async fn upload_pack(&self, repo_name: &str, request: Vec<u8>) -> GitResult<Vec<u8>> {
        let this = self.clone();
        let name = repo_name.to_string();
        run_blocking(move || {
            let repo = this.registry.get(&name)?;
            let session = repo.session(SessionKind::UploadPack)?;
            session.upload_pack(&request)
        })
        .await
    }

    /// Push handling for `POST /{repo}/git-receive-pack`: apply the pack,
    /// then run the anchoring sequence. An anchoring failure fails the
    /// request even though the pack already landed in the object store.
    pub async fn receive_pack(&self, repo_name: &str, request: Vec<u8>) -> GitResult<Vec<u8>> {
        let this = self.clone();
        let name = repo_name.to_string();
        let (repo, report, cid) = run_blocking(move || {
            let repo = this.registry.get(&name)?;
            let report = {
                let session = repo.session(SessionKind::ReceivePack)?;
                session.receive_pack(&request)?
            };
            let cid = this.snapshot_and_pin(&repo)?;
            Ok((repo, report, cid))
        })
        .await?;

        let tx = self.signer.sign_anchor(repo.id, &cid)?;
        let tx_hash = self.ledger.submit_anchor(tx).await?;
        repo.set_metadata_cid(cid.clone());
        tracing::info!(
            repo = %repo.name,
            id = %repo.id,
            metadata = %cid,
            tx = %tx_hash,
            "push anchored"
        );
        Ok(report)
    }

    /// Provision a repository from a creation event and anchor its initial
    /// manifest.
    pub async fn create_repo(&self, event: RepositoryCreatedEvent) -> GitResult<Arc<Repo>> {
        self.provision_repo(RepoSpec {
            id: RepoId(event.id),
            name: event.name,
            description: event.description,
            owner: event.owner,
            fork_from: None,
        })
        .await
    }

    /// Provision a repository — empty, reopened, or cloned from a fork
    /// origin — register it, and anchor its initial manifest.
    pub async fn provision_repo(&self, spec: RepoSpec) -> GitResult<Arc<Repo>> {
        let this = self.clone();
        let (repo, cid) = run_blocking(move || {
            if this.registry.contains(&spec.name) {
                return Err(GitError::RepoAlreadyExists(spec.name.clone()));
            }
            let repo = Arc::new(Repo::new(spec, this.host_fs.clone(), &this.config.repo_root)?);
            repo.provision()?;

            let manifest = RepoManifest::generate(&repo, &this.config.base_url)?;
            let cid = this.pin_manifest(&manifest)?;

            this.registry.insert(repo.clone())?;
            repo.set_metadata_cid(cid.clone());
            Ok((repo, cid))
        })
        .await?;

        let tx = self.signer.sign_anchor(repo.id, &cid)?;
        let tx_hash = self.ledger.submit_anchor(tx).await?;
        tracing::info!(
            repo = %repo.name,
            id = %repo.id,
            metadata = %cid,
            tx = %tx_hash,
            "repository created and anchored"
        );
        Ok(repo)
    }

    /// Run the ledger event loop until `stop` flips. Transport failures
    /// resubscribe after a pause; per-event failures are logged and the
    /// event is dropped.
    pub async fn listen_repository_creation(self, mut stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                tracing::warn!("stop listening for repository creation events");
                return;
            }

            let mut subscription = match self.ledger.subscribe().await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to subscribe to repository creation events");
                    if self.pause_or_stop(&mut stop).await {
                        return;
                    }
                    continue;
                }
            };
            tracing::info!("listening for repository creation events");

            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            tracing::warn!("stop listening for repository creation events");
                            return;
                        }
                    }
                    next = subscription.next() => match next {
                        Some(Ok(event)) => {
                            tracing::info!(
                                repo = %event.name,
                                id = event.id,
                                owner = %event.owner,
                                "repository creation event"
                            );
                            let name = event.name.clone();
                            if let Err(e) = self.create_repo(event).await {
                                tracing::error!(repo = %name, error = %e, "failed to create repository");
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "repository creation subscription error");
                            break;
                        }
                        None => {
                            tracing::error!("repository creation subscription closed");
                            break;
                        }
                    }
                }
            }

            if self.pause_or_stop(&mut stop).await {
                tracing::warn!("stop listening for repository creation events");
                return;
            }
        }
    }

    /// Wait out the resubscribe delay; true when stop was requested.
    async fn pause_or_stop(&self, stop: &mut watch::Receiver<bool>) -> bool {
        if *stop.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.config.resubscribe_delay) => false,
            changed = stop.changed() => changed.is_err() || *stop.borrow(),
        }
    }

    /// Generate, fill, and pin the post-push manifest, pinning each file's
    /// content individually first (two-level pin).
    fn snapshot_and_pin(&self, repo: &Repo) -> GitResult<ContentId> {
        let mut manifest =
            RepoManifest::generate(repo, &self.config.base_url).map_err(as_manifest_error)?;
        manifest.fill_content(repo).map_err(as_manifest_error)?;
        manifest.fill_commits(repo).map_err(as_manifest_error)?;

        for record in &mut manifest.tree {
            // Pin names derive from the blob hash: stable under retries and
            // collision-free across fast successive pushes.
            let pin_name = format!("{}-{}", manifest.name, record.hash);
            let cid = self
                .pinner
                .pin(&pin_name, &record.content)
                .map_err(|source| GitError::Pin {
                    name: pin_name,
                    source,
                })?;
            tracing::debug!(repo = %manifest.name, file = %record.name, %cid, "file pinned");
            record.hash = cid.to_string();
        }

        self.pin_manifest(&manifest)
    }

    fn pin_manifest(&self, manifest: &RepoManifest) -> GitResult<ContentId> {
        let bytes = manifest.to_json()?;
        let pin_name = if manifest.commit == REPO_CREATED_MARKER {
            format!("{}-meta.json", manifest.name)
        } else {
            format!("{}-{}-meta.json", manifest.name, manifest.commit)
        };
        let cid = self
            .pinner
            .pin(&pin_name, &bytes)
            .map_err(|source| GitError::Pin {
                name: pin_name,
                source,
            })?;
        tracing::info!(repo = %manifest.name, %cid, "repository metadata pinned");
        Ok(cid)
    }
}

/// Anchoring treats engine failures during manifest assembly as manifest
/// build failures, not generic engine errors.
fn as_manifest_error(e: GitError) -> GitError {
    match e {
        GitError::Engine(inner) => GitError::ManifestBuild(inner),
        other => other,
    }
}

async fn run_blocking<T, F>(f: F) -> GitResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> GitResult<T> + Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| GitError::TaskJoin(e.to_string()))?
}
