//! Error taxonomy for the issuance and verification pipelines
//!
//! Stages convert foreign errors to the closest kind at the boundary where
//! they occur. Terminal job failures carry the message into the job row;
//! transient stage failures are logged and retried on the next tick;
//! configuration errors bubble out at startup only.

use thiserror::Error;

use crate::crypto::signing::SigningError;

/// Errors that can occur across the issuance and verification pipelines
#[derive(Error, Debug)]
pub enum IssuerError {
    /// Missing or malformed environment / key material
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Object storage I/O
    #[error("storage error: {0}")]
    Storage(String),

    /// Database error
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Signature or digest parse/verify failure
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Structural Merkle failure
    #[error("merkle error: {0}")]
    Merkle(String),

    /// RPC or transaction failure
    #[error("chain error: {0}")]
    Chain(String),

    /// PDF parse, attach, or render failure
    #[error("pdf error: {0}")]
    Pdf(String),

    /// Content mismatch between carrier and embedded original
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Wrong state for the requested transition
    #[error("invalid state transition for {entity}: {from} -> {to}")]
    State {
        entity: String,
        from: String,
        to: String,
    },

    /// Bad input
    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, IssuerError>;

impl From<std::io::Error> for IssuerError {
    fn from(e: std::io::Error) -> Self {
        IssuerError::Storage(e.to_string())
    }
}

impl From<lopdf::Error> for IssuerError {
    fn from(e: lopdf::Error) -> Self {
        IssuerError::Pdf(e.to_string())
    }
}

impl From<serde_json::Error> for IssuerError {
    fn from(e: serde_json::Error) -> Self {
        IssuerError::Validation(e.to_string())
    }
}

impl From<SigningError> for IssuerError {
    fn from(e: SigningError) -> Self {
        IssuerError::Crypto(e.to_string())
    }
}
