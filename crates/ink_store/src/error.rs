use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the storage substrate.
///
/// Every fallible operation returns this; the only panic in the crate is
/// the documented programmer error of calling `open` on an already-open
/// handle.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] ink_crypto::CryptoError),

    #[error("Migration {version} failed: {source}")]
    Migration {
        version: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Transaction failed: {source}")]
    Transaction {
        #[source]
        source: Box<StoreError>,
    },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that crossed the worker bridge. The original variant cannot
    /// be reconstructed, but its classification survives in `kind`.
    #[error("{kind:?}: {message}")]
    Remote { kind: ErrorKind, message: String },
}

/// Transport-safe error classification, stable across the worker bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    Cancelled,
    Transport,
    Crypto,
    Migration,
    Transaction,
    Validation,
    Database,
    Serialization,
    Io,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Unauthorized(_) => ErrorKind::Unauthorized,
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::Transport(_) => ErrorKind::Transport,
            StoreError::Crypto(_) => ErrorKind::Crypto,
            StoreError::Migration { .. } => ErrorKind::Migration,
            StoreError::Transaction { .. } => ErrorKind::Transaction,
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::Database(_) => ErrorKind::Database,
            StoreError::Serialization(_) => ErrorKind::Serialization,
            StoreError::Io(_) => ErrorKind::Io,
            StoreError::Remote { kind, .. } => *kind,
        }
    }
}

/// Wire form of a [`StoreError`], carried in bridge error envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&StoreError> for WireError {
    fn from(err: &StoreError) -> Self {
        WireError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<WireError> for StoreError {
    fn from(wire: WireError) -> Self {
        match wire.kind {
            ErrorKind::NotFound => StoreError::NotFound(wire.message),
            ErrorKind::Unauthorized => StoreError::Unauthorized(wire.message),
            ErrorKind::Cancelled => StoreError::Cancelled,
            ErrorKind::Transport => StoreError::Transport(wire.message),
            ErrorKind::Validation => StoreError::Validation(wire.message),
            kind => StoreError::Remote {
                kind,
                message: wire.message,
            },
        }
    }
}
