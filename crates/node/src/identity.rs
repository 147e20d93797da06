//! Ed25519 identities derived from persisted seeds

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

use oracle_core::IdentityInitError;
use oracle_store::{IdentityStore, Seed, DISCOVERY_SEED_KEY, RPC_SEED_KEY};

pub const PUBLIC_KEY_LEN: usize = 32;

/// Public half of an identity; how peers address each other
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check a signature made by the matching keypair
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(message, &signature).is_ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// Public key text that is not 32 hex-encoded bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid public key: {0}")]
pub struct ParsePublicKeyError(String);

impl FromStr for PublicKey {
    type Err = ParsePublicKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| ParsePublicKeyError(e.to_string()))?;
        let bytes: [u8; PUBLIC_KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| ParsePublicKeyError(format!("{} bytes, expected 32", b.len())))?;
        Ok(Self(bytes))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Signing keypair rebuilt from a 32-byte seed
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    pub fn from_seed(seed: &Seed) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// The node's two long-lived identities
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Signs discovery announcements
    pub discovery: Keypair,
    /// Addresses the RPC endpoint
    pub rpc: Keypair,
}

impl NodeIdentity {
    pub async fn load(store: &IdentityStore) -> Result<Self, IdentityInitError> {
        let discovery = Keypair::from_seed(&store.get_or_create_seed(DISCOVERY_SEED_KEY).await?);
        let rpc = Keypair::from_seed(&store.get_or_create_seed(RPC_SEED_KEY).await?);

        info!(
            discovery = %discovery.public_key(),
            rpc = %rpc.public_key(),
            "Identities loaded"
        );
        Ok(Self { discovery, rpc })
    }
}
