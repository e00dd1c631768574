//! Storage layout configuration
//!
//! The builder addresses contract storage by slot number. Slot numbers depend on how the
//! registry and mediator contracts were compiled, so they are configuration, not constants.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// Slot numbers of the mappings the resolution program reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageLayout {
    /// Registry: `mapping(address controller => mapping(bytes32 node => bytes32 link))`
    pub links: u64,
    /// Registry: `mapping(address owner => mapping(bytes32 key => uint256 ns))`
    pub namespaces: u64,
    /// Registry: `mapping(uint256 ns => mapping(bytes32 fragment => mapping(bytes32 key => bytes)))`
    pub records: u64,
    /// Mediator: `mapping(uint256 token => struct { uint256 expiry; uint256 ns; })`
    pub leases: u64,
}

impl StorageLayout {
    pub fn links_slot(&self) -> U256 {
        U256::from(self.links)
    }

    pub fn namespaces_slot(&self) -> U256 {
        U256::from(self.namespaces)
    }

    pub fn records_slot(&self) -> U256 {
        U256::from(self.records)
    }

    pub fn leases_slot(&self) -> U256 {
        U256::from(self.leases)
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            links: 0,
            namespaces: 1,
            records: 2,
            leases: 6,
        }
    }
}
