//! Standalone smart HTTP server binary.
//!
//! ## Purpose
//! Runs the Git HTTP surface on its own, with in-memory backends and an
//! in-process ledger.
//!
//! ## Intended use
//! Development and debugging when only the HTTP surface matters: push and
//! fetch against repositories created by emitting events on the in-process
//! ledger (none are emitted here, so pair it with tests or a driver). The
//! workspace's main `anchorgit-run` binary wires real backends and the
//! event listener.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use anchorgit_core::{ChannelLedger, CoreConfig, GitService, Signer, StorePinner};
use anchorgit_vfs::{Fs, MemoryStore, Vfs};
use api_rest::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("ANCHORGIT_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    tracing::info!("-- starting anchorgit smart HTTP surface on {}", addr);

    let store = Arc::new(MemoryStore::new());
    let host_fs: Arc<dyn Fs> = Arc::new(Vfs::new(store.clone()));
    let service = GitService::new(
        host_fs,
        Arc::new(StorePinner::new(store)),
        Signer::generate(),
        Arc::new(ChannelLedger::new()),
        CoreConfig::new(format!("http://{addr}/")),
    );

    let app = router(AppState::new(service));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
