//! Peer discovery - maps a public key to a reachable address
//!
//! Peers publish signed [`Announcement`]s; a resolver only trusts an
//! announcement whose signature checks out against the signer it names.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use oracle_core::now_ms;

use crate::error::DiscoveryError;
use crate::identity::{Keypair, PublicKey};

/// A peer's claim that its RPC key is reachable at an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// RPC identity being announced
    pub public_key: PublicKey,
    pub address: SocketAddr,
    /// Discovery identity that signed the announcement
    pub signer: PublicKey,
    pub announced_at: u64,
    /// Hex-encoded ed25519 signature
    pub signature: String,
}

impl Announcement {
    pub fn signed(public_key: PublicKey, address: SocketAddr, signer: &Keypair) -> Self {
        let announced_at = now_ms();
        let message = Self::message(&public_key, &address, announced_at);

        Self {
            public_key,
            address,
            signer: signer.public_key(),
            announced_at,
            signature: hex::encode(signer.sign(&message)),
        }
    }

    fn message(public_key: &PublicKey, address: &SocketAddr, announced_at: u64) -> Vec<u8> {
        format!("{}|{}|{}", public_key, address, announced_at).into_bytes()
    }

    pub fn verify(&self) -> Result<(), DiscoveryError> {
        let signature = hex::decode(&self.signature)
            .map_err(|_| DiscoveryError::InvalidSignature(self.public_key))?;
        let message = Self::message(&self.public_key, &self.address, self.announced_at);

        if self.signer.verify(&message, &signature) {
            Ok(())
        } else {
            Err(DiscoveryError::InvalidSignature(self.public_key))
        }
    }
}

/// Registry of reachable peers
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Publish an announcement, replacing any earlier one for the same key
    async fn register(&self, announcement: Announcement) -> Result<(), DiscoveryError>;

    /// Withdraw the announcement for `public_key`; a no-op if there is none
    async fn unregister(&self, public_key: &PublicKey) -> Result<(), DiscoveryError>;

    async fn resolve(&self, public_key: &PublicKey) -> Result<SocketAddr, DiscoveryError>;
}

/// In-process registry
#[derive(Debug, Default)]
pub struct MemoryDiscovery {
    peers: DashMap<PublicKey, Announcement>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[async_trait]
impl Discovery for MemoryDiscovery {
    async fn register(&self, announcement: Announcement) -> Result<(), DiscoveryError> {
        announcement.verify()?;
        debug!("Registered {} at {}", announcement.public_key, announcement.address);
        self.peers.insert(announcement.public_key, announcement);
        Ok(())
    }

    async fn unregister(&self, public_key: &PublicKey) -> Result<(), DiscoveryError> {
        self.peers.remove(public_key);
        Ok(())
    }

    async fn resolve(&self, public_key: &PublicKey) -> Result<SocketAddr, DiscoveryError> {
        self.peers
            .get(public_key)
            .map(|entry| entry.address)
            .ok_or(DiscoveryError::NotFound(*public_key))
    }
}

/// Registry shared through a directory, one JSON file per announced key.
///
/// Lets nodes and clients on the same host find each other without a
/// separate lookup service.
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    dir: PathBuf,
}

impl FileDiscovery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, public_key: &PublicKey) -> PathBuf {
        self.dir.join(format!("{}.json", public_key.to_hex()))
    }
}

#[async_trait]
impl Discovery for FileDiscovery {
    async fn register(&self, announcement: Announcement) -> Result<(), DiscoveryError> {
        announcement.verify()?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let body = serde_json::to_vec_pretty(&announcement)
            .map_err(|e| DiscoveryError::Decode(e.to_string()))?;
        let path = self.entry_path(&announcement.public_key);
        let tmp = path.with_extension("json.tmp");

        // Readers never see a half-written entry
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        info!("Announced {} at {} in {}", announcement.public_key, announcement.address, self.dir.display());
        Ok(())
    }

    async fn unregister(&self, public_key: &PublicKey) -> Result<(), DiscoveryError> {
        match tokio::fs::remove_file(self.entry_path(public_key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve(&self, public_key: &PublicKey) -> Result<SocketAddr, DiscoveryError> {
        let body = match tokio::fs::read(self.entry_path(public_key)).await {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DiscoveryError::NotFound(*public_key))
            }
            Err(e) => return Err(e.into()),
        };

        let announcement: Announcement =
            serde_json::from_slice(&body).map_err(|e| DiscoveryError::Decode(e.to_string()))?;
        if announcement.public_key != *public_key {
            return Err(DiscoveryError::Decode(format!(
                "entry for {} announces {}",
                public_key, announcement.public_key
            )));
        }
        announcement.verify()?;
        Ok(announcement.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn announcement(port: u16) -> (Announcement, PublicKey) {
        let signer = Keypair::from_seed(&[1u8; 32]);
        let rpc = Keypair::from_seed(&[2u8; 32]).public_key();
        let address: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        (Announcement::signed(rpc, address, &signer), rpc)
    }

    #[test]
    fn test_tampered_announcement_fails() {
        let (mut a, _) = announcement(4000);
        assert!(a.verify().is_ok());

        a.address = "10.0.0.1:4000".parse().unwrap();
        assert!(matches!(a.verify(), Err(DiscoveryError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn test_memory_discovery() {
        let discovery = MemoryDiscovery::new();
        let (a, key) = announcement(4000);

        assert!(matches!(discovery.resolve(&key).await, Err(DiscoveryError::NotFound(_))));

        discovery.register(a.clone()).await.unwrap();
        assert_eq!(discovery.resolve(&key).await.unwrap(), a.address);

        discovery.unregister(&key).await.unwrap();
        assert!(discovery.is_empty());
        discovery.unregister(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_rejects_forged() {
        let discovery = MemoryDiscovery::new();
        let (mut a, _) = announcement(4000);
        a.signer = Keypair::from_seed(&[9u8; 32]).public_key();

        assert!(discovery.register(a).await.is_err());
        assert!(discovery.is_empty());
    }

    #[tokio::test]
    async fn test_file_discovery_shared_between_instances() {
        let tmp = TempDir::new().unwrap();
        let server_side = FileDiscovery::new(tmp.path().join("registry"));
        let client_side = FileDiscovery::new(tmp.path().join("registry"));
        let (a, key) = announcement(4100);

        server_side.register(a.clone()).await.unwrap();
        assert_eq!(client_side.resolve(&key).await.unwrap(), a.address);

        // Re-announcing replaces the address
        let (moved, _) = announcement(4200);
        server_side.register(moved.clone()).await.unwrap();
        assert_eq!(client_side.resolve(&key).await.unwrap(), moved.address);

        server_side.unregister(&key).await.unwrap();
        assert!(matches!(
            client_side.resolve(&key).await,
            Err(DiscoveryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_discovery_rejects_tampered_entry() {
        let tmp = TempDir::new().unwrap();
        let discovery = FileDiscovery::new(tmp.path());
        let (a, key) = announcement(4300);
        discovery.register(a).await.unwrap();

        let path = discovery.entry_path(&key);
        let mut entry: Announcement =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        entry.address = "127.0.0.1:4301".parse().unwrap();
        std::fs::write(&path, serde_json::to_vec(&entry).unwrap()).unwrap();

        assert!(matches!(
            discovery.resolve(&key).await,
            Err(DiscoveryError::InvalidSignature(_))
        ));
    }
}
