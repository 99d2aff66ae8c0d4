//! Main entry point for the anchorgit service.
//!
//! Wires the content store, virtual filesystem, pinner, signer, and ledger
//! client into the hosting service, then runs two long-lived pieces until
//! shutdown:
//! - the ledger event listener provisioning repositories from
//!   repository-creation events, and
//! - the Git smart HTTP server.
//!
//! # Environment Variables
//! - `ANCHORGIT_HTTP_ADDR`: HTTP server address (default: "0.0.0.0:8080")
//! - `ANCHORGIT_BASE_URL`: external locator prefix written into manifests
//!   (default: "http://<http addr>/")
//! - `ANCHORGIT_CONTENT_STORE`: "memory" or "http" (default: "memory")
//! - `ANCHORGIT_CONTENT_STORE_ADDR`: content store API address, for "http"
//! - `ANCHORGIT_PINNER`: "store" or "http" (default: "store")
//! - `ANCHORGIT_PINNER_JWT`: bearer token for the HTTP pinning service
//! - `ANCHORGIT_PINNER_ENDPOINT`: pinning endpoint override
//! - `ANCHORGIT_SIGNER_KEY`: PKCS#8 PEM key (inline, path, or base64);
//!   an ephemeral key is generated when unset
//!
//! The ledger client wired here is the in-process one: its wire protocol is
//! deployment-specific, and production setups inject their own
//! `LedgerClient` implementation.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use anchorgit_core::{
    ChannelLedger, CoreConfig, GitService, HttpPinner, Pinner, Signer, StorePinner,
};
use anchorgit_vfs::{ContentStore, Fs, HttpStore, MemoryStore, Vfs};
use api_rest::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("anchorgit=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let http_addr = std::env::var("ANCHORGIT_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let base_url =
        std::env::var("ANCHORGIT_BASE_URL").unwrap_or_else(|_| format!("http://{http_addr}/"));

    let store = build_store()?;
    let host_fs: Arc<dyn Fs> = Arc::new(Vfs::new(store.clone()));
    let pinner = build_pinner(store)?;
    let signer = build_signer()?;
    let ledger = Arc::new(ChannelLedger::new());

    let service = GitService::new(
        host_fs,
        pinner,
        signer,
        ledger,
        CoreConfig::new(base_url),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let listener_task = tokio::spawn(service.clone().listen_repository_creation(stop_rx));

    tracing::info!("++ starting anchorgit smart HTTP on {}", http_addr);
    let app = router(AppState::new(service));
    let tcp = tokio::net::TcpListener::bind(&http_addr).await?;
    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The HTTP server is down; stop the event loop and wait for it.
    stop_tx.send(true).ok();
    listener_task.await?;
    tracing::info!("anchorgit stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
    }
}

fn build_store() -> anyhow::Result<Arc<dyn ContentStore>> {
    let kind = std::env::var("ANCHORGIT_CONTENT_STORE").unwrap_or_else(|_| "memory".into());
    match kind.as_str() {
        "memory" => {
            tracing::warn!("using the in-memory content store; contents do not survive restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
        "http" => {
            let addr = std::env::var("ANCHORGIT_CONTENT_STORE_ADDR")
                .unwrap_or_else(|_| "http://127.0.0.1:5001".into());
            tracing::info!(addr, "using HTTP content store");
            Ok(Arc::new(HttpStore::new(addr)))
        }
        other => anyhow::bail!("unsupported content store {other:?}"),
    }
}

fn build_pinner(store: Arc<dyn ContentStore>) -> anyhow::Result<Arc<dyn Pinner>> {
    let kind = std::env::var("ANCHORGIT_PINNER").unwrap_or_else(|_| "store".into());
    match kind.as_str() {
        "store" => Ok(Arc::new(StorePinner::new(store))),
        "http" => {
            let jwt = std::env::var("ANCHORGIT_PINNER_JWT")
                .map_err(|_| anyhow::anyhow!("ANCHORGIT_PINNER_JWT is required for the HTTP pinner"))?;
            Ok(match std::env::var("ANCHORGIT_PINNER_ENDPOINT") {
                Ok(endpoint) => Arc::new(HttpPinner::with_endpoint(endpoint, jwt)),
                Err(_) => Arc::new(HttpPinner::new(jwt)),
            })
        }
        other => anyhow::bail!("unsupported pinner {other:?}"),
    }
}

fn build_signer() -> anyhow::Result<Signer> {
    match std::env::var("ANCHORGIT_SIGNER_KEY") {
        Ok(source) => Ok(Signer::from_pem_source(&source)?),
        Err(_) => {
            tracing::warn!("ANCHORGIT_SIGNER_KEY is unset; using an ephemeral signing key");
            Ok(Signer::generate())
        }
    }
}
