//! Ed25519 keys and signatures.
//!
//! All consensus signatures are made over 32-byte digests, never over raw
//! message bytes. Key material lives in [`KeyPair`]; everything that crosses
//! the wire carries only [`PublicKey`] and [`Signature`], which are plain
//! byte newtypes with a canonical SBOR encoding.

use crate::hash::Sha256;
use crate::identifiers::NodeAddress;
use ed25519_dalek::{Signer as _, Verifier as _};
use sbor::prelude::BasicSbor;
use std::fmt;

/// A 32-byte ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// The federation address derived from this key.
    pub fn address(&self) -> NodeAddress {
        NodeAddress::from_public_key(self)
    }

    /// Verify `signature` over `digest`.
    ///
    /// Returns `false` both for invalid signatures and for byte strings
    /// that do not decode to a curve point.
    pub fn verify(&self, digest: &Sha256, signature: &Signature) -> bool {
        let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(digest.as_bytes(), &sig).is_ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..", hex::encode(&self.0[..4]))
    }
}

/// A 64-byte ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 64] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig:{}..", hex::encode(&self.0[..4]))
    }
}

/// An ed25519 signing key together with its derived public half.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut rng),
        }
    }

    /// Deterministic keypair from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&seed),
        }
    }

    /// Parse a hex-encoded 32-byte seed.
    pub fn from_seed_hex(hex_seed: &str) -> Option<Self> {
        let bytes = hex::decode(hex_seed).ok()?;
        let seed: [u8; 32] = bytes.try_into().ok()?;
        Some(Self::from_seed(seed))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn address(&self) -> NodeAddress {
        self.public_key().address()
    }

    /// Sign a 32-byte digest.
    pub fn sign(&self, digest: &Sha256) -> Signature {
        let sig = self.signing_key.sign(digest.as_bytes());
        Signature(sig.to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the secret half.
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish()
    }
}
