//! prover-server: Reference prover over HTTP
//!
//! Serves `POST /evaluate` for gateway requests, evaluated by the reference machine
//! against a storage snapshot pinned to one block. It produces outputs only, no proofs,
//! and stands in for a real prover in local setups and integration tests.
//!
//! | Route            | Body                                    | Response                      |
//! |------------------|-----------------------------------------|-------------------------------|
//! | `GET /health`    | -                                       | `{status, block, slots}`      |
//! | `POST /evaluate` | `{ops, inputs, block?}`                 | `{outputs, exitCode}`         |
//!
//! A request for a block other than the snapshot's (or `latest`) gets `409 Conflict`.

pub mod error;
pub mod server;

pub use error::{ProverError, Result};
pub use server::{create_router, AppState, EvaluateRequest, EvaluateResponse};
