//! Prover server error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Structured error response for API clients
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

#[derive(Error, Debug)]
pub enum ProverError {
    #[error("Invalid program: {0}")]
    InvalidProgram(#[from] resolver_core::VmError),

    #[error("Snapshot is pinned to block {loaded}, request asks for {requested}")]
    StaleSnapshot { requested: String, loaded: String },
}

impl ProverError {
    fn code(&self) -> &'static str {
        match self {
            ProverError::InvalidProgram(_) => "INVALID_PROGRAM",
            ProverError::StaleSnapshot { .. } => "STALE_SNAPSHOT",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ProverError::InvalidProgram(_) => StatusCode::BAD_REQUEST,
            ProverError::StaleSnapshot { .. } => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ProverError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProverError>;
