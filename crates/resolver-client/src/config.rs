//! Client configuration

use std::path::Path;
use std::time::Duration;

use alloy_primitives::Address;
use resolver_core::{Basename, BasenameRegistry, StorageLayout};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Client configuration, loaded from a JSON file.
///
/// ```json
/// {
///   "rpc_url": "http://localhost:8545",
///   "prover_url": "http://localhost:3000",
///   "block": "latest",
///   "registry": "0x5FbDB2315678afecb367f032d93F642f64180aa3",
///   "basenames": [{ "name": "chonk.eth", "controller": "0x7099..." }]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// JSON-RPC endpoint for `eth_call`
    pub rpc_url: String,
    /// Prover base URL (`POST {prover_url}/evaluate`)
    pub prover_url: String,
    /// Block tag or number every call and evaluation is pinned to
    pub block: String,
    /// Registry contract holding links, namespaces and records
    pub registry: Address,
    /// Resolving contract for the off-chain lookup handshake
    pub resolver: Option<Address>,
    pub layout: StorageLayout,
    pub basenames: Vec<Basename>,
    /// Extra attempts after a transient prover failure
    pub prover_retries: u32,
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            prover_url: "http://localhost:3000".to_string(),
            block: "latest".to_string(),
            registry: Address::ZERO,
            resolver: None,
            layout: StorageLayout::default(),
            basenames: Vec::new(),
            prover_retries: 2,
            timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;

        tracing::info!(
            path = %path.as_ref().display(),
            basenames = config.basenames.len(),
            registry = %config.registry,
            "Loaded client config"
        );

        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn basename_registry(&self) -> BasenameRegistry {
        self.basenames.iter().cloned().collect()
    }
}
