//! The ledger boundary.
//!
//! The ledger's wire protocol is an external concern; the pipeline consumes
//! it through two narrow operations: subscribing to repository-creation
//! events and submitting signed anchor transactions. [`ChannelLedger`] is
//! the in-process implementation used for development and tests — it
//! buffers events emitted while no subscriber is attached, so an outage
//! between subscriptions loses nothing.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::repo::OwnerAddress;
use crate::signer::AnchorTx;
use crate::{GitError, GitResult};

/// A "repository created" event as emitted by the ledger contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryCreatedEvent {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub owner: OwnerAddress,
}

/// Hash of a submitted ledger transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxHash(pub String);

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A recoverable transport failure on the event stream. The event loop
/// answers it by resubscribing, never by terminating.
#[derive(Clone, Debug, thiserror::Error)]
#[error("ledger subscription transport: {0}")]
pub struct SubscriptionError(pub String);

type EventResult = Result<RepositoryCreatedEvent, SubscriptionError>;

/// A live event stream. The stream ending is treated as a transport
/// failure by the consumer.
pub struct EventSubscription {
    rx: mpsc::Receiver<EventResult>,
}

impl EventSubscription {
    pub fn from_receiver(rx: mpsc::Receiver<EventResult>) -> Self {
        Self { rx }
    }

    /// The next event, a transport error, or `None` when the stream closed.
    pub async fn next(&mut self) -> Option<EventResult> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Open a fresh subscription to repository-creation events.
    async fn subscribe(&self) -> GitResult<EventSubscription>;

    /// Submit a signed anchor transaction, returning its hash.
    async fn submit_anchor(&self, tx: AnchorTx) -> GitResult<TxHash>;
}

const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Default)]
struct LedgerState {
    subscriber: Option<mpsc::Sender<EventResult>>,
    backlog: VecDeque<RepositoryCreatedEvent>,
    submitted: Vec<AnchorTx>,
}

/// In-process ledger: events are emitted through a handle, anchors are
/// recorded, and subscription faults can be injected.
#[derive(Default)]
pub struct ChannelLedger {
    state: Mutex<LedgerState>,
}

impl ChannelLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a repository-creation event. Buffered if no subscriber is
    /// attached, so events survive a resubscribe cycle.
    pub fn emit(&self, event: RepositoryCreatedEvent) {
        let mut state = self.state.lock().unwrap();
        if let Some(tx) = state.subscriber.take() {
            if tx.try_send(Ok(event.clone())).is_ok() {
                state.subscriber = Some(tx);
                return;
            }
            // Receiver gone or full: leave the slot empty and fall through
            // to the backlog.
        }
        state.backlog.push_back(event);
    }

    /// Inject a transport failure: the current subscription observes the
    /// error and then the end of its stream.
    pub fn fail_subscription(&self, reason: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(tx) = state.subscriber.take() {
            let _ = tx.try_send(Err(SubscriptionError(reason.to_string())));
        }
    }

    /// Anchor transactions submitted so far, in order.
    pub fn submitted(&self) -> Vec<AnchorTx> {
        self.state.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl LedgerClient for ChannelLedger {
    async fn subscribe(&self) -> GitResult<EventSubscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut state = self.state.lock().unwrap();
        while let Some(event) = state.backlog.pop_front() {
            tx.try_send(Ok(event))
                .map_err(|e| GitError::Subscribe(e.to_string()))?;
        }
        state.subscriber = Some(tx);
        Ok(EventSubscription::from_receiver(rx))
    }

    async fn submit_anchor(&self, tx: AnchorTx) -> GitResult<TxHash> {
        let serialized = serde_json::to_vec(&tx)?;
        let hash = TxHash(hex::encode(Sha256::digest(&serialized)));
        tracing::debug!(repo_id = %tx.repo_id, cid = %tx.content_id, tx = %hash, "anchor recorded");
        self.state.lock().unwrap().submitted.push(tx);
        Ok(hash)
    }
}
