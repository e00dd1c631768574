//! resolver-core: Linked name resolution through storage-proof programs
//!
//! A name such as `raffy.chonk.eth` resolves in three steps:
//!
//! 1. **Decompose** the name against a basename registry (longest suffix wins).
//! 2. **Build** a gateway request: a stack-machine program that walks the registry's
//!    storage mappings. Both the owned and the delegated branch are read in one request.
//! 3. **Select** the branch the link descriptor points at, once a prover has evaluated the
//!    request against a block.
//!
//! ## Storage Model
//!
//! | Mapping                                   | Contract  | Purpose                     |
//! |-------------------------------------------|-----------|-----------------------------|
//! | `links[controller][node]`                 | registry  | owned vs. tokenized         |
//! | `namespaces[owner][node or token]`        | registry  | namespace id                |
//! | `records[ns][fragment][key]`              | registry  | record value (`bytes`)      |
//! | `leases[token] = {expiry, ns}`            | mediator  | time-boxed delegation       |
//!
//! Slot numbers come from [`StorageLayout`].
//!
//! The crate does not talk to the network. [`Machine`] is a reference evaluator over an
//! in-memory [`MemoryState`]; remote provers and the off-chain lookup handshake live in
//! `resolver-client`.

pub mod builder;
mod config;
mod error;
pub mod keys;
pub mod names;
pub mod program;
pub mod request;
pub mod state;
pub mod vm;

pub use builder::{
    select, Delegation, DelegationStatus, Link, ResolutionBuilder, ResolvedRecord,
    EXIT_LEASE_EXPIRED, EXIT_NO_DELEGATION, EXIT_RECORD_PRESENT, OUTPUT_COUNT,
};
pub use config::StorageLayout;
pub use error::Error;
pub use keys::{
    address_key, contenthash_key, fragment_key, keccak256, labelhash, mono_key, namehash,
    pubkey_key, text_key, RecordKind,
};
pub use names::{dns_decode, dns_encode, Basename, BasenameRegistry, Decomposition, Token};
pub use program::{GatewayProgram, Op, ProgramError};
pub use request::{GatewayRequest, Request};
pub use state::{MemoryState, RegistryWriter, SlotEntry, StateReader};
pub use vm::{EvalState, Machine, VmError};

pub type Result<T> = std::result::Result<T, Error>;
