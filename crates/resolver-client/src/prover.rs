//! Provers: evaluate gateway requests against a block
//!
//! | Prover          | Backend                                   |
//! |-----------------|-------------------------------------------|
//! | [`HttpProver`]  | remote `POST {url}/evaluate`              |
//! | [`LocalProver`] | reference evaluator over a [`StateReader`] |
//!
//! Transport failures and stale snapshots surface as [`ClientError::ProverTransient`];
//! [`evaluate_with_retry`] retries only those. An aborted program is a result, not an error.

use std::future::Future;
use std::time::Duration;

use alloy_primitives::Bytes;
use reqwest::{Client, StatusCode};
use resolver_core::{EvalState, Machine, StateReader};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Evaluates `(ops, inputs)` and returns outputs with the exit code
pub trait Prover: Send + Sync {
    fn evaluate(
        &self,
        ops: &Bytes,
        inputs: &[Bytes],
    ) -> impl Future<Output = Result<EvalState>> + Send;
}

impl<T: Prover> Prover for &T {
    fn evaluate(
        &self,
        ops: &Bytes,
        inputs: &[Bytes],
    ) -> impl Future<Output = Result<EvalState>> + Send {
        (**self).evaluate(ops, inputs)
    }
}

/// Delay before the first retry; grows linearly per attempt
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Evaluate, retrying transient failures up to `retries` extra times
pub async fn evaluate_with_retry<P: Prover>(
    prover: &P,
    ops: &Bytes,
    inputs: &[Bytes],
    retries: u32,
) -> Result<EvalState> {
    let mut attempt = 0u32;
    loop {
        match prover.evaluate(ops, inputs).await {
            Ok(state) => return Ok(state),
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                tracing::warn!(attempt, retries, error = %e, "Prover unavailable, retrying");
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runs the reference evaluator in-process
#[derive(Debug, Clone)]
pub struct LocalProver<S> {
    state: S,
}

impl<S: StateReader + Send + Sync> LocalProver<S> {
    pub fn new(state: S) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &S {
        &self.state
    }
}

impl<S: StateReader + Send + Sync> Prover for LocalProver<S> {
    async fn evaluate(&self, ops: &Bytes, inputs: &[Bytes]) -> Result<EvalState> {
        Ok(Machine::new(&self.state).evaluate(ops, inputs)?)
    }
}

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    ops: &'a Bytes,
    inputs: &'a [Bytes],
    block: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateResponse {
    outputs: Vec<Bytes>,
    exit_code: u8,
}

fn transport_error(err: reqwest::Error) -> ClientError {
    if err.is_connect() || err.is_timeout() {
        ClientError::ProverTransient(err.to_string())
    } else {
        ClientError::Http(err)
    }
}

/// Remote prover speaking JSON over HTTP
pub struct HttpProver {
    http: Client,
    url: String,
    block: String,
}

impl HttpProver {
    pub fn new(url: impl Into<String>, block: impl Into<String>) -> Self {
        Self::with_client(Client::new(), url, block)
    }

    pub fn with_timeout(
        url: impl Into<String>,
        block: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, url, block))
    }

    pub fn with_client(http: Client, url: impl Into<String>, block: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into().trim_end_matches('/').to_string(),
            block: block.into(),
        }
    }
}

impl Prover for HttpProver {
    async fn evaluate(&self, ops: &Bytes, inputs: &[Bytes]) -> Result<EvalState> {
        let url = format!("{}/evaluate", self.url);

        tracing::debug!(
            url = %url,
            ops = ops.len(),
            inputs = inputs.len(),
            block = %self.block,
            "Submitting request to prover"
        );

        let resp = self
            .http
            .post(&url)
            .json(&EvaluateRequest {
                ops,
                inputs,
                block: &self.block,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status.is_server_error() || status == StatusCode::CONFLICT {
            return Err(ClientError::ProverTransient(format!(
                "{} - {}",
                status.as_u16(),
                resp.text().await.unwrap_or_default()
            )));
        }
        if !status.is_success() {
            return Err(ClientError::Server {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let body: EvaluateResponse = resp.json().await.map_err(transport_error)?;
        Ok(EvalState::new(
            body.outputs.into_iter().map(Some).collect(),
            body.exit_code,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use resolver_core::{GatewayRequest, MemoryState};

    struct FlakyProver {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> ClientError,
    }

    impl Prover for FlakyProver {
        async fn evaluate(&self, _ops: &Bytes, _inputs: &[Bytes]) -> Result<EvalState> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err((self.error)());
            }
            Ok(EvalState::new(vec![], 0))
        }
    }

    fn create_test_prover(failures: u32, error: fn() -> ClientError) -> FlakyProver {
        FlakyProver {
            failures,
            calls: AtomicU32::new(0),
            error,
        }
    }

    fn transient() -> ClientError {
        ClientError::ProverTransient("connection refused".into())
    }

    #[tokio::test]
    async fn test_retries_transient() {
        let prover = create_test_prover(2, transient);
        let result = evaluate_with_retry(&prover, &Bytes::new(), &[], 2).await;

        assert!(result.is_ok());
        assert_eq!(prover.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let prover = create_test_prover(5, transient);
        let result = evaluate_with_retry(&prover, &Bytes::new(), &[], 1).await;

        assert!(matches!(result, Err(ClientError::ProverTransient(_))));
        assert_eq!(prover.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_not_retried() {
        let prover = create_test_prover(1, || ClientError::Server {
            status: 400,
            message: "bad request".into(),
        });
        let result = evaluate_with_retry(&prover, &Bytes::new(), &[], 3).await;

        assert!(matches!(result, Err(ClientError::Server { status: 400, .. })));
        assert_eq!(prover.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_prover() {
        let mut req = GatewayRequest::new(1);
        req.push_str("local").set_output(0);
        let request = req.finish().unwrap();

        let prover = LocalProver::new(MemoryState::new());
        let state = prover.evaluate(&request.ops, &request.inputs).await.unwrap();
        assert_eq!(state.output(0).unwrap().as_ref(), b"local");
    }

    #[tokio::test]
    async fn test_local_prover_malformed() {
        let prover = LocalProver::new(MemoryState::new());
        let result = prover.evaluate(&Bytes::new(), &[]).await;
        assert!(matches!(result, Err(ClientError::Core(_))));
    }
}
