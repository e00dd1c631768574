//! HTTP server evaluating gateway requests against a storage snapshot

use std::sync::Arc;

use alloy_primitives::Bytes;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use resolver_core::{Machine, MemoryState};
use serde::{Deserialize, Serialize};

use crate::error::{ProverError, Result};

/// Block tag that matches any pinned snapshot
pub const LATEST: &str = "latest";

/// Server state
pub struct AppState {
    pub state: MemoryState,
    /// Block the snapshot was taken at
    pub block: String,
}

impl AppState {
    pub fn new(state: MemoryState, block: impl Into<String>) -> Self {
        Self {
            state,
            block: block.into(),
        }
    }
}

/// Evaluation request
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub ops: Bytes,
    #[serde(default)]
    pub inputs: Vec<Bytes>,
    #[serde(default)]
    pub block: Option<String>,
}

/// Evaluation response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
    pub outputs: Vec<Bytes>,
    pub exit_code: u8,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub block: String,
    pub slots: usize,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/evaluate", post(evaluate_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        block: state.block.clone(),
        slots: state.state.len(),
    })
}

async fn evaluate_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>> {
    if let Some(block) = request.block.as_deref() {
        if block != LATEST && block != state.block {
            return Err(ProverError::StaleSnapshot {
                requested: block.to_string(),
                loaded: state.block.clone(),
            });
        }
    }

    let start = std::time::Instant::now();
    let result = Machine::new(&state.state).evaluate(&request.ops, &request.inputs)?;

    tracing::info!(
        ops = request.ops.len(),
        inputs = request.inputs.len(),
        exit_code = result.exit_code(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "Evaluated request"
    );

    Ok(Json(EvaluateResponse {
        outputs: result.resolve_outputs(),
        exit_code: result.exit_code(),
    }))
}
