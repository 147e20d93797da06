//! Persisted identity seeds
//!
//! A seed is generated once per role and reused verbatim on every start, so
//! the keys derived from it (and the node's public identity) stay stable.

use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use tracing::info;

use oracle_core::{IdentityInitError, StorageWriteError};

use crate::log::LogStore;

/// Key of the seed behind the discovery identity
pub const DISCOVERY_SEED_KEY: &str = "dht-seed";

/// Key of the seed behind the RPC identity
pub const RPC_SEED_KEY: &str = "rpc-seed";

pub const SEED_LEN: usize = 32;

pub type Seed = [u8; SEED_LEN];

/// Seed storage on top of the node's log
#[derive(Debug, Clone)]
pub struct IdentityStore {
    log: Arc<LogStore>,
}

impl IdentityStore {
    pub fn new(log: Arc<LogStore>) -> Self {
        Self { log }
    }

    /// Return the seed stored under `name`, generating and persisting it first
    /// if it does not exist yet.
    pub async fn get_or_create_seed(&self, name: &str) -> Result<Seed, IdentityInitError> {
        let log = Arc::clone(&self.log);
        let owned = name.to_string();

        tokio::task::spawn_blocking(move || load_or_generate(&log, &owned))
            .await
            .map_err(|e| IdentityInitError::Storage {
                name: name.to_string(),
                reason: e.to_string(),
            })?
    }
}

fn load_or_generate(log: &LogStore, name: &str) -> Result<Seed, IdentityInitError> {
    if let Some(stored) = log.get(name) {
        return to_seed(name, &stored);
    }

    let mut seed = [0u8; SEED_LEN];
    OsRng.fill_bytes(&mut seed);

    match log.insert(name, &seed) {
        Ok(()) => {
            info!("Generated new identity seed {}", name);
            Ok(seed)
        }
        // Someone stored it between our lookup and insert; theirs wins
        Err(StorageWriteError::KeyExists(_)) => match log.get(name) {
            Some(stored) => to_seed(name, &stored),
            None => Err(IdentityInitError::Storage {
                name: name.to_string(),
                reason: "seed vanished after conflicting write".to_string(),
            }),
        },
        Err(e) => Err(IdentityInitError::Storage {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn to_seed(name: &str, bytes: &[u8]) -> Result<Seed, IdentityInitError> {
    bytes
        .try_into()
        .map_err(|_| IdentityInitError::InvalidSeedLength {
            name: name.to_string(),
            len: bytes.len(),
        })
}
