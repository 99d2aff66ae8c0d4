//! The pinning boundary: `pin(name, bytes) -> content id`.
//!
//! Pinning asks a content-addressable service to retain a blob indefinitely.
//! [`StorePinner`] pins straight into a [`ContentStore`]; [`HttpPinner`]
//! talks to a pinata-style pinning API over HTTP.

use std::sync::Arc;

use anchorgit_vfs::{ContentId, ContentStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum PinError {
    #[error("pin request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("pin service response malformed: {0}")]
    Decode(String),
    #[error("content store: {0}")]
    Store(#[from] StoreError),
}

pub trait Pinner: Send + Sync {
    fn pin(&self, name: &str, bytes: &[u8]) -> Result<ContentId, PinError>;
}

/// Pins into the content store itself. Suitable for local development and
/// for deployments whose store already guarantees retention.
pub struct StorePinner {
    store: Arc<dyn ContentStore>,
}

impl StorePinner {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }
}

impl Pinner for StorePinner {
    fn pin(&self, name: &str, bytes: &[u8]) -> Result<ContentId, PinError> {
        let id = self.store.put(bytes)?;
        tracing::debug!(name, %id, "pinned to content store");
        Ok(id)
    }
}

const DEFAULT_PIN_ENDPOINT: &str = "https://api.pinata.cloud/pinning/pinFileToIPFS";

/// Client for a pinata-style HTTP pinning service: a multipart POST with a
/// bearer token, answered with the pinned content's id.
pub struct HttpPinner {
    endpoint: String,
    jwt: String,
    client: reqwest::blocking::Client,
}

#[derive(serde::Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

impl HttpPinner {
    pub fn new(jwt: impl Into<String>) -> Self {
        Self::with_endpoint(DEFAULT_PIN_ENDPOINT, jwt)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, jwt: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            jwt: jwt.into(),
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Pinner for HttpPinner {
    fn pin(&self, name: &str, bytes: &[u8]) -> Result<ContentId, PinError> {
        let part = reqwest::blocking::multipart::Part::bytes(bytes.to_vec())
            .file_name(name.to_string());
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("pinataOptions", "{\"cidVersion\": 1}")
            .text("pinataMetadata", format!("{{\"name\": \"{name}\"}}"));

        let body = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.jwt)
            .multipart(form)
            .send()?
            .error_for_status()?
            .text()?;

        let resp: PinResponse =
            serde_json::from_str(&body).map_err(|e| PinError::Decode(e.to_string()))?;
        tracing::debug!(name, id = %resp.ipfs_hash, "pinned via pinning service");
        Ok(ContentId::new(resp.ipfs_hash))
    }
}
