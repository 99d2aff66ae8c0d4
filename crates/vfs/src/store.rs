//! The content-addressable backing store.
//!
//! The store is an external collaborator reached through the narrow
//! [`ContentStore`] contract: `put` persists a blob and returns its content
//! identifier, `get` retrieves a blob by identifier. [`MemoryStore`] is the
//! process-local implementation (identifiers are SHA-256 digests);
//! [`HttpStore`] talks to an IPFS-style HTTP API.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

/// The address a content-addressable store returns for a blob.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ContentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("content {0} not found in store")]
    NotFound(String),
    #[error("content store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to decode content store response: {0}")]
    Decode(serde_json::Error),
}

/// Content-addressable blob storage: `put(bytes) -> id`, `get(id) -> bytes`.
pub trait ContentStore: Send + Sync {
    fn put(&self, bytes: &[u8]) -> Result<ContentId, StoreError>;
    fn get(&self, id: &ContentId) -> Result<Vec<u8>, StoreError>;
}

/// In-memory content store. Identifiers are hex SHA-256 digests, so equal
/// content always maps to the same id.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs held.
    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentStore for MemoryStore {
    fn put(&self, bytes: &[u8]) -> Result<ContentId, StoreError> {
        let id = hex::encode(Sha256::digest(bytes));
        self.blobs
            .lock()
            .unwrap()
            .entry(id.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(ContentId::new(id))
    }

    fn get(&self, id: &ContentId) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

/// Client for an IPFS-style content store HTTP API (`/api/v0/add`,
/// `/api/v0/cat`).
pub struct HttpStore {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[derive(serde::Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl ContentStore for HttpStore {
    fn put(&self, bytes: &[u8]) -> Result<ContentId, StoreError> {
        let part = reqwest::blocking::multipart::Part::bytes(bytes.to_vec()).file_name("blob");
        let form = reqwest::blocking::multipart::Form::new().part("file", part);

        let body = self
            .client
            .post(format!("{}/api/v0/add?pin=true", self.base_url))
            .multipart(form)
            .send()?
            .error_for_status()?
            .text()?;

        let resp: AddResponse = serde_json::from_str(&body).map_err(StoreError::Decode)?;
        Ok(ContentId::new(resp.hash))
    }

    fn get(&self, id: &ContentId) -> Result<Vec<u8>, StoreError> {
        let resp = self
            .client
            .post(format!("{}/api/v0/cat?arg={}", self.base_url, id))
            .send()?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_string()));
        }

        Ok(resp.error_for_status()?.bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        let id = store.put(b"hello").unwrap();
        assert_eq!(store.get(&id).unwrap(), b"hello");
    }

    #[test]
    fn memory_store_is_content_addressed() {
        let store = MemoryStore::new();
        let a = store.put(b"same").unwrap();
        let b = store.put(b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn memory_store_missing_id() {
        let store = MemoryStore::new();
        let err = store.get(&ContentId::new("deadbeef")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
