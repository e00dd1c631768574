//! resolver-client: Network side of linked name resolution
//!
//! Two ways to resolve a name:
//!
//! - **Direct** ([`Resolver`]): build the resolution request locally, send it to a prover,
//!   select the branch from the outputs.
//! - **Handshake** ([`Handshake`]): call the resolving contract, which reverts with
//!   `OffchainLookup` carrying its own request; evaluate that request and hand the outputs
//!   back through the callback.
//!
//! Provers ([`HttpProver`], [`LocalProver`]) and contract callers ([`RpcCaller`]) are traits
//! so both paths run against in-process fakes in tests.

pub mod abi;
pub mod client;
pub mod config;
pub mod error;
pub mod handshake;
pub mod prover;
pub mod rpc;

pub use abi::RecordValue;
pub use client::{Resolver, ResolverBuilder};
pub use config::ClientConfig;
pub use error::ClientError;
pub use handshake::{AwaitingRevert, Answered, Evaluating, Handshake, Lookup, LookupOutcome};
pub use prover::{evaluate_with_retry, HttpProver, LocalProver, Prover};
pub use rpc::{CallOutcome, ContractCaller, RpcCaller};
