//! Contract calls over JSON-RPC

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, Result};

/// `eth_call` reports a revert with this code
const EXECUTION_REVERTED: i64 = 3;

/// Result of a read-only contract call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success(Bytes),
    /// Revert data, starting with the error selector
    Revert(Bytes),
}

/// Something that can execute read-only contract calls at a fixed block
pub trait ContractCaller: Send + Sync {
    fn call(&self, to: Address, data: Bytes) -> impl Future<Output = Result<CallOutcome>> + Send;
}

impl<T: ContractCaller> ContractCaller for &T {
    fn call(&self, to: Address, data: Bytes) -> impl Future<Output = Result<CallOutcome>> + Send {
        (**self).call(to, data)
    }
}

#[derive(Serialize)]
struct CallParams {
    to: Address,
    data: Bytes,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (CallParams, &'a str),
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Bytes>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Hex revert data from a JSON-RPC error, if present
fn revert_data(error: &RpcErrorObject) -> Option<Bytes> {
    let data = error.data.as_ref()?;
    let text = match data {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => obj.get("data")?.as_str()?,
        _ => return None,
    };
    hex::decode(text.trim_start_matches("0x")).ok().map(Bytes::from)
}

/// `eth_call` over HTTP JSON-RPC
pub struct RpcCaller {
    http: Client,
    url: String,
    block: String,
    next_id: AtomicU64,
}

impl RpcCaller {
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
            url: url.into(),
            block: block.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn block(&self) -> &str {
        &self.block
    }
}

impl ContractCaller for RpcCaller {
    async fn call(&self, to: Address, data: Bytes) -> Result<CallOutcome> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method: "eth_call",
            params: (CallParams { to, data }, &self.block),
        };

        tracing::debug!(id, to = %to, block = %self.block, "eth_call");

        let resp = self.http.post(&self.url).json(&request).send().await?;

        if !resp.status().is_success() {
            return Err(ClientError::Server {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let body: RpcResponse = resp.json().await?;

        if let Some(error) = body.error {
            if let Some(data) = revert_data(&error) {
                return Ok(CallOutcome::Revert(data));
            }
            if error.code == EXECUTION_REVERTED {
                return Ok(CallOutcome::Revert(Bytes::new()));
            }
            return Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(CallOutcome::Success(body.result.unwrap_or_default()))
    }
}
