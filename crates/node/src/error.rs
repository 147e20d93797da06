//! Error types for the network-facing side of the node

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

use oracle_core::{IdentityInitError, MalformedRequestError, QueryError};

use crate::gateway::GatewayState;
use crate::identity::PublicKey;

/// Kind of failure reported back to a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcErrorKind {
    MalformedRequest,
    UnknownMethod,
    Internal,
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MalformedRequest => "MalformedRequest",
            Self::UnknownMethod => "UnknownMethod",
            Self::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Error response body: `{"error": kind, "message": text}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    #[serde(rename = "error")]
    pub kind: RpcErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new(RpcErrorKind::UnknownMethod, format!("no handler for {}", method))
    }
}

impl From<MalformedRequestError> for RpcError {
    fn from(e: MalformedRequestError) -> Self {
        Self::new(RpcErrorKind::MalformedRequest, e.to_string())
    }
}

impl From<QueryError> for RpcError {
    fn from(e: QueryError) -> Self {
        Self::new(RpcErrorKind::Internal, e.to_string())
    }
}

/// Peer registry failures
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("No announcement for {0}")]
    NotFound(PublicKey),

    #[error("Announcement for {0} has an invalid signature")]
    InvalidSignature(PublicKey),

    #[error("Registry I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unreadable announcement: {0}")]
    Decode(String),
}

/// Connection-level failures between two peers
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Connected to {actual}, expected {expected}")]
    IdentityMismatch { expected: PublicKey, actual: PublicKey },

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Remote error: {0}")]
    Remote(RpcError),

    #[error("Unreadable response: {0}")]
    Decode(String),
}

/// Gateway lifecycle failures
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Cannot {action} a gateway that is {from:?}")]
    InvalidTransition {
        from: GatewayState,
        action: &'static str,
    },

    #[error("Identity initialization failed: {0}")]
    Identity(#[from] IdentityInitError),

    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Listener error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_wire_shape() {
        let err = RpcError::unknown_method("getEverything");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "UnknownMethod");
        assert_eq!(json["message"], "no handler for getEverything");

        let back: RpcError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_malformed_maps_to_kind() {
        let err: RpcError = MalformedRequestError::InvalidJson("eof".to_string()).into();
        assert_eq!(err.kind, RpcErrorKind::MalformedRequest);
    }
}
