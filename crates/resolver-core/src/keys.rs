//! Storage key derivation for namespace records
//!
//! Records are stored in nested Solidity mappings, so every lookup key is a keccak256
//! digest computed the same way the contracts compute it:
//!
//! | Record    | Key                                      |
//! |-----------|------------------------------------------|
//! | address   | `keccak256(uint256 coinType ‖ uint256 0)` |
//! | text      | `keccak256(bytes(key) ‖ uint256 1)`       |
//! | singleton | `keccak256(tag ‖ uint256 2)`              |
//!
//! The trailing discriminant keeps the three families apart. Fragments (the part of a name
//! left of its basename) are keyed by their ENS namehash, so the empty fragment is the zero
//! node.

use alloy_primitives::{Address, B256, U256};
use tiny_keccak::{Hasher, Keccak};

/// Discriminant appended to address record keys
pub const ADDRESS_RECORD: u64 = 0;

/// Discriminant appended to text record keys
pub const TEXT_RECORD: u64 = 1;

/// Discriminant appended to singleton record keys
pub const MONO_RECORD: u64 = 2;

/// `contenthash(bytes32)` selector
pub const CONTENTHASH_SELECTOR: [u8; 4] = [0xbc, 0x1c, 0x58, 0xd1];

/// `pubkey(bytes32)` selector
pub const PUBKEY_SELECTOR: [u8; 4] = [0xc8, 0x69, 0x02, 0x33];

/// Coin type of the default EVM address (ENSIP-19)
pub const DEFAULT_EVM_COIN_TYPE: u64 = 0x8000_0000;

/// keccak256 of the given bytes
pub fn keccak256(data: &[u8]) -> B256 {
    let mut hasher = Keccak::v256();
    hasher.update(data);

    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    B256::from(hash)
}

fn tagged_key(data: &[u8], kind: u64) -> B256 {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    hasher.update(&U256::from(kind).to_be_bytes::<32>());

    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    B256::from(hash)
}

/// Key of an address record for the given coin type (ENSIP-9/11)
pub fn address_key(coin_type: U256) -> B256 {
    tagged_key(&coin_type.to_be_bytes::<32>(), ADDRESS_RECORD)
}

/// Key of a text record
pub fn text_key(key: &str) -> B256 {
    tagged_key(key.as_bytes(), TEXT_RECORD)
}

/// Key of a singleton record, usually tagged by the selector of its getter
pub fn mono_key(tag: &[u8]) -> B256 {
    tagged_key(tag, MONO_RECORD)
}

/// Key of the `contenthash` record
pub fn contenthash_key() -> B256 {
    mono_key(&CONTENTHASH_SELECTOR)
}

/// Key of the `pubkey` record
pub fn pubkey_key() -> B256 {
    mono_key(&PUBKEY_SELECTOR)
}

/// Plain keccak256 of a single label, as used to key tokens
pub fn labelhash(label: &str) -> B256 {
    keccak256(label.as_bytes())
}

/// ENS namehash of a dotted name. The empty name is the zero node.
pub fn namehash(name: &str) -> B256 {
    let mut node = [0u8; 32];
    if name.is_empty() {
        return B256::from(node);
    }

    for label in name.rsplit('.') {
        let mut hasher = Keccak::v256();
        hasher.update(&node);
        hasher.update(labelhash(label).as_slice());
        hasher.finalize(&mut node);
    }

    B256::from(node)
}

/// Key of a fragment path inside a namespace
#[inline]
pub fn fragment_key(path: &str) -> B256 {
    namehash(path)
}

/// Storage slot of `mapping[key]` for a mapping rooted at `slot`.
///
/// Value-type keys must already be left-padded to 32 bytes; `bytes`/`string` keys are
/// hashed as-is, matching Solidity.
pub fn mapping_slot(key: &[u8], slot: U256) -> U256 {
    let mut hasher = Keccak::v256();
    hasher.update(key);
    hasher.update(&slot.to_be_bytes::<32>());

    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    U256::from_be_bytes(hash)
}

/// Left-pad an address to a 32-byte mapping key
#[inline]
pub fn address_word(address: &Address) -> B256 {
    address.into_word()
}

/// A record a name can be resolved for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    /// Address for a coin type (60 = ETH)
    Addr(U256),
    /// Text record by key
    Text(String),
    /// Content hash (singleton)
    Contenthash,
    /// SECP256k1 public key `(x, y)` (singleton)
    Pubkey,
}

impl RecordKind {
    /// The record key inside a fragment
    pub fn storage_key(&self) -> B256 {
        match self {
            RecordKind::Addr(coin_type) => address_key(*coin_type),
            RecordKind::Text(key) => text_key(key),
            RecordKind::Contenthash => contenthash_key(),
            RecordKind::Pubkey => pubkey_key(),
        }
    }

    /// Key read when this record is empty: chain-specific EVM addresses fall back to the
    /// default EVM address
    pub fn fallback_key(&self) -> Option<B256> {
        let RecordKind::Addr(coin_type) = self else {
            return None;
        };
        let default = U256::from(DEFAULT_EVM_COIN_TYPE);
        let is_chain = *coin_type > default && *coin_type <= U256::from(u32::MAX);
        is_chain.then(|| address_key(default))
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Addr(coin_type) => write!(f, "addr({})", coin_type),
            RecordKind::Text(key) => write!(f, "text({})", key),
            RecordKind::Contenthash => write!(f, "contenthash"),
            RecordKind::Pubkey => write!(f, "pubkey"),
        }
    }
}
