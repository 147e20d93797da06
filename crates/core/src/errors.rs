//! Error types

use std::io;

use thiserror::Error;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Durable store rejected a write. Nothing was persisted.
#[derive(Debug, Error)]
pub enum StorageWriteError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Key already written: {0}")]
    KeyExists(String),

    #[error("Key too long: {0} bytes")]
    KeyTooLong(usize),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// Durable store failed to read. Missing data is never an error.
#[derive(Debug, Error)]
pub enum StorageReadError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt record at byte offset {offset}: {detail}")]
    Corrupt { offset: u64, detail: String },

    #[error("Undecodable value under {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("Data directory already in use: {0}")]
    Locked(String),
}

/// Market data call failed or returned malformed data
#[derive(Debug, Error)]
pub enum DataSourceFetchError {
    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// Inbound RPC payload could not be decoded
#[derive(Debug, Error)]
pub enum MalformedRequestError {
    #[error("Payload is not UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("Payload is not a valid request: {0}")]
    InvalidJson(String),
}

/// Identity seed could not be generated or persisted
#[derive(Debug, Error)]
pub enum IdentityInitError {
    #[error("Seed {name} could not be stored: {reason}")]
    Storage { name: String, reason: String },

    #[error("Seed {name} has {len} bytes, expected 32")]
    InvalidSeedLength { name: String, len: usize },
}

/// Query resolution errors
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Storage read failed: {0}")]
    Storage(#[from] StorageReadError),
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
pub type WriteResult<T> = Result<T, StorageWriteError>;
pub type ReadResult<T> = Result<T, StorageReadError>;
pub type FetchResult<T> = Result<T, DataSourceFetchError>;
pub type QueryResult<T> = Result<T, QueryError>;
