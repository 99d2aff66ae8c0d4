//! Anchor transaction signing.
//!
//! Anchors are signed with ECDSA P-256 over a canonical payload binding the
//! repository id to the pinned manifest's content id. The signature is the
//! raw 64 bytes (`r || s`, not DER), base64-encoded alongside the SEC1
//! public key, so a verifier needs nothing beyond the transaction itself.
//! The signer's ledger address is the hex SHA-256 of its SEC1-encoded
//! public key.

use base64::{engine::general_purpose, Engine as _};
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use anchorgit_vfs::ContentId;

use crate::repo::{OwnerAddress, RepoId};
use crate::{GitError, GitResult};

/// A signed ledger transaction recording a repository's current content id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorTx {
    pub repo_id: RepoId,
    pub content_id: String,
    /// Signer's ledger address.
    pub address: String,
    /// Base64 of the SEC1-encoded public key.
    pub public_key: String,
    /// Base64 of the raw 64-byte `r || s` signature.
    pub signature: String,
}

impl AnchorTx {
    /// The canonical byte payload a transaction signs.
    fn payload(repo_id: RepoId, content_id: &str) -> String {
        format!("anchor:{repo_id}:{content_id}")
    }

    /// Verify the embedded signature and that the address matches the
    /// embedded public key.
    pub fn verify(&self) -> bool {
        let Ok(pub_bytes) = general_purpose::STANDARD.decode(&self.public_key) else {
            return false;
        };
        let Ok(sig_bytes) = general_purpose::STANDARD.decode(&self.signature) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_sec1_bytes(&pub_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        if address_of(&key) != self.address {
            return false;
        }
        let payload = Self::payload(self.repo_id, &self.content_id);
        key.verify(payload.as_bytes(), &signature).is_ok()
    }
}

fn address_of(key: &VerifyingKey) -> String {
    let sec1 = key.to_encoded_point(false);
    hex::encode(Sha256::digest(sec1.as_bytes()))
}

/// Holds the service's signing key and derived ledger address.
pub struct Signer {
    key: SigningKey,
    address: OwnerAddress,
}

impl Signer {
    /// Load an ECDSA private key in PKCS#8 PEM form. The source may be the
    /// PEM text itself, a path to a PEM file, or base64-encoded PEM.
    pub fn from_pem_source(source: &str) -> GitResult<Self> {
        let pem = if source.contains("-----BEGIN") {
            source.to_string()
        } else if std::path::Path::new(source).exists() {
            std::fs::read_to_string(source).map_err(|e| GitError::SignerKey(e.to_string()))?
        } else {
            let decoded = general_purpose::STANDARD
                .decode(source)
                .map_err(|e| GitError::SignerKey(e.to_string()))?;
            String::from_utf8(decoded).map_err(|e| GitError::SignerKey(e.to_string()))?
        };

        let key =
            SigningKey::from_pkcs8_pem(&pem).map_err(|e| GitError::SignerKey(e.to_string()))?;
        Ok(Self::from_key(key))
    }

    /// Generate an ephemeral key. Development only: anchors signed with it
    /// cannot be tied to a configured ledger identity.
    pub fn generate() -> Self {
        Self::from_key(SigningKey::random(&mut rand::rngs::OsRng))
    }

    fn from_key(key: SigningKey) -> Self {
        let address = OwnerAddress::new(address_of(key.verifying_key()));
        Self { key, address }
    }

    /// The ledger address derived from the signing key.
    pub fn address(&self) -> &OwnerAddress {
        &self.address
    }

    /// Sign a transaction binding `repo_id` to `content_id`.
    pub fn sign_anchor(&self, repo_id: RepoId, content_id: &ContentId) -> GitResult<AnchorTx> {
        let payload = AnchorTx::payload(repo_id, content_id.as_str());
        let signature: Signature = self.key.sign(payload.as_bytes());

        let public_key = self
            .key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();

        Ok(AnchorTx {
            repo_id,
            content_id: content_id.to_string(),
            address: self.address.to_string(),
            public_key: general_purpose::STANDARD.encode(public_key),
            signature: general_purpose::STANDARD.encode(signature.to_bytes()),
        })
    }
}
