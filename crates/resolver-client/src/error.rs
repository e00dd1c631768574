//! Client error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("Prover unavailable: {0}")]
    ProverTransient(String),

    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] resolver_core::Error),
}

impl ClientError {
    /// Only an unreachable or stale prover is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::ProverTransient(_))
    }
}

impl From<resolver_core::VmError> for ClientError {
    fn from(err: resolver_core::VmError) -> Self {
        ClientError::Core(err.into())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
