//! Chain state snapshots for the reference evaluator
//!
//! [`StateReader`] is the only thing the evaluator needs from a chain: the 32-byte word
//! stored at `(contract, slot)` in a fixed block. [`MemoryState`] keeps such a snapshot in
//! memory, and [`RegistryWriter`] seeds it the way the registry and mediator contracts lay
//! out their mappings.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::config::StorageLayout;
use crate::keys::{fragment_key, keccak256, mapping_slot, namehash};
use crate::Result;

/// Read-only view of contract storage at a fixed block
pub trait StateReader {
    /// Word at `(target, slot)`; unset slots read as zero
    fn storage(&self, target: Address, slot: U256) -> B256;
}

impl<T: StateReader + ?Sized> StateReader for &T {
    fn storage(&self, target: Address, slot: U256) -> B256 {
        (**self).storage(target, slot)
    }
}

impl<T: StateReader + ?Sized> StateReader for Arc<T> {
    fn storage(&self, target: Address, slot: U256) -> B256 {
        (**self).storage(target, slot)
    }
}

/// One stored word, the unit of the JSON snapshot format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub target: Address,
    pub slot: U256,
    pub value: B256,
}

/// In-memory storage snapshot.
///
/// Serializes as a JSON array of [`SlotEntry`]; zero words are never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<SlotEntry>", into = "Vec<SlotEntry>")]
pub struct MemoryState {
    slots: BTreeMap<(Address, U256), B256>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`save`](Self::save)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let state: Self = serde_json::from_str(&data)?;

        tracing::info!(
            path = %path.as_ref().display(),
            slots = state.len(),
            "Loaded storage snapshot"
        );

        Ok(state)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = SlotEntry> + '_ {
        self.slots.iter().map(|(&(target, slot), &value)| SlotEntry {
            target,
            slot,
            value,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn set_word(&mut self, target: Address, slot: U256, value: B256) {
        if value.is_zero() {
            self.slots.remove(&(target, slot));
        } else {
            self.slots.insert((target, slot), value);
        }
    }

    pub fn set_u256(&mut self, target: Address, slot: U256, value: U256) {
        self.set_word(target, slot, B256::from(value.to_be_bytes::<32>()));
    }

    /// Store a Solidity `bytes` value: short values inline with `len * 2` in the low byte,
    /// long values as `len * 2 + 1` with the data at `keccak256(slot)`.
    pub fn set_bytes(&mut self, target: Address, slot: U256, value: &[u8]) {
        if value.len() < 32 {
            let mut word = [0u8; 32];
            word[..value.len()].copy_from_slice(value);
            word[31] = (value.len() * 2) as u8;
            self.set_word(target, slot, B256::from(word));
            return;
        }

        self.set_u256(target, slot, U256::from(value.len() * 2 + 1));

        let base = U256::from_be_bytes(keccak256(&slot.to_be_bytes::<32>()).0);
        for (i, chunk) in value.chunks(32).enumerate() {
            let mut word = [0u8; 32];
            word[..chunk.len()].copy_from_slice(chunk);
            self.set_word(target, base.wrapping_add(U256::from(i)), B256::from(word));
        }
    }
}

impl From<Vec<SlotEntry>> for MemoryState {
    fn from(entries: Vec<SlotEntry>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<MemoryState> for Vec<SlotEntry> {
    fn from(state: MemoryState) -> Self {
        state.entries().collect()
    }
}

impl FromIterator<SlotEntry> for MemoryState {
    fn from_iter<I: IntoIterator<Item = SlotEntry>>(iter: I) -> Self {
        let mut state = Self::new();
        for entry in iter {
            state.set_word(entry.target, entry.slot, entry.value);
        }
        state
    }
}

impl StateReader for MemoryState {
    fn storage(&self, target: Address, slot: U256) -> B256 {
        self.slots
            .get(&(target, slot))
            .copied()
            .unwrap_or(B256::ZERO)
    }
}

/// Seeds registry and mediator storage following a [`StorageLayout`]
pub struct RegistryWriter<'a> {
    state: &'a mut MemoryState,
    registry: Address,
    layout: StorageLayout,
}

impl<'a> RegistryWriter<'a> {
    pub fn new(state: &'a mut MemoryState, registry: Address, layout: StorageLayout) -> Self {
        Self {
            state,
            registry,
            layout,
        }
    }

    /// `links[controller][namehash(basename)] = descriptor`
    pub fn set_link(&mut self, controller: Address, basename: &str, descriptor: B256) -> &mut Self {
        let slot = mapping_slot(
            namehash(basename).as_slice(),
            mapping_slot(controller.into_word().as_slice(), self.layout.links_slot()),
        );
        self.state.set_word(self.registry, slot, descriptor);
        self
    }

    /// `namespaces[owner][key] = ns`; `key` is a basename node or a token id
    pub fn set_namespace(&mut self, owner: Address, key: B256, ns: U256) -> &mut Self {
        let slot = mapping_slot(
            key.as_slice(),
            mapping_slot(owner.into_word().as_slice(), self.layout.namespaces_slot()),
        );
        self.state.set_u256(self.registry, slot, ns);
        self
    }

    /// `records[ns][fragment_key(fragment)][key] = value`
    pub fn set_record(&mut self, ns: U256, fragment: &str, key: B256, value: &[u8]) -> &mut Self {
        let slot = mapping_slot(
            key.as_slice(),
            mapping_slot(
                fragment_key(fragment).as_slice(),
                mapping_slot(&ns.to_be_bytes::<32>(), self.layout.records_slot()),
            ),
        );
        self.state.set_bytes(self.registry, slot, value);
        self
    }

    /// `leases[token] = { expiry, ns }` on the mediator contract
    pub fn set_lease(
        &mut self,
        mediator: Address,
        token: B256,
        expiry: u64,
        ns: U256,
    ) -> &mut Self {
        let slot = mapping_slot(token.as_slice(), self.layout.leases_slot());
        self.state.set_u256(mediator, slot, U256::from(expiry));
        self.state.set_u256(mediator, slot + U256::from(1), ns);
        self
    }
}
