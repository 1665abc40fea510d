//! Private-key isolation.
//!
//! Every service that needs a signature goes through the [`Signer`] trait.
//! The key may live in this process ([`LocalSigner`]) or behind an external
//! signing daemon ([`HttpSigner`]); callers cannot tell which.

use async_trait::async_trait;
use concord_types::{KeyPair, NodeAddress, PublicKey, Sha256, Signature};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signing endpoint request failed: {0}")]
    Endpoint(String),
    #[error("signing endpoint returned a malformed signature")]
    MalformedSignature,
}

/// Produces signatures over 32-byte digests for this node's identity.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, digest: &Sha256) -> Result<Signature, SignerError>;
    fn public_key(&self) -> PublicKey;
    fn node_address(&self) -> NodeAddress;
}

/// Keeps the signing key in process memory.
pub struct LocalSigner {
    keypair: KeyPair,
}

impl LocalSigner {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn sign(&self, digest: &Sha256) -> Result<Signature, SignerError> {
        Ok(self.keypair.sign(digest))
    }

    fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    fn node_address(&self) -> NodeAddress {
        self.keypair.address()
    }
}

#[derive(Serialize)]
struct SignRequest<'a> {
    payload_hex: &'a str,
}

#[derive(Deserialize)]
struct SignResponse {
    signature_hex: String,
}

/// Delegates to an external signing daemon over `POST /sign`.
pub struct HttpSigner {
    client: reqwest::Client,
    endpoint: String,
    public_key: PublicKey,
}

impl HttpSigner {
    /// `endpoint` is the daemon's base URL; the node's public key must be
    /// configured alongside it since the daemon never reveals it.
    pub fn new(endpoint: String, public_key: PublicKey) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            public_key,
        }
    }
}

#[async_trait]
impl Signer for HttpSigner {
    async fn sign(&self, digest: &Sha256) -> Result<Signature, SignerError> {
        let payload_hex = hex::encode(digest.as_bytes());
        let response = self
            .client
            .post(format!("{}/sign", self.endpoint))
            .json(&SignRequest {
                payload_hex: &payload_hex,
            })
            .send()
            .await
            .map_err(|e| SignerError::Endpoint(e.to_string()))?
            .error_for_status()
            .map_err(|e| SignerError::Endpoint(e.to_string()))?;
        let body: SignResponse = response
            .json()
            .await
            .map_err(|e| SignerError::Endpoint(e.to_string()))?;
        let bytes = hex::decode(&body.signature_hex)
            .map_err(|_| SignerError::MalformedSignature)?;
        Signature::from_slice(&bytes).ok_or(SignerError::MalformedSignature)
    }

    fn public_key(&self) -> PublicKey {
        self.public_key
    }

    fn node_address(&self) -> NodeAddress {
        self.public_key.address()
    }
}
