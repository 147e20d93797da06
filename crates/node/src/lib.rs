//! Price oracle node
//!
//! Serves aggregated prices to peers that find it by public key:
//! - Ed25519 identities derived from persisted seeds
//! - Signed peer announcements (in-memory and shared-directory registries)
//! - Length-prefixed TCP request/response transport
//! - Gateway binding `ping`, `getLatestPrices` and `getHistoricalPrices`

pub mod client;
pub mod codec;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod logging;
pub mod settings;
pub mod transport;

pub use client::{Connection, RpcClient};
pub use discovery::{Announcement, Discovery, FileDiscovery, MemoryDiscovery};
pub use error::{DiscoveryError, GatewayError, RpcError, RpcErrorKind, TransportError};
pub use gateway::{build_router, GatewayState, RpcGateway};
pub use identity::{Keypair, NodeIdentity, PublicKey};
pub use transport::{Router, RpcServer};
