//! linked-resolver: Linked ENS-style name resolution through storage-proof programs
//!
//! - [`resolver_core`]: name decomposition, program assembly, resolution builder, reference evaluator
//! - [`resolver_client`]: provers, JSON-RPC calls, the off-chain lookup handshake, direct resolution
//! - [`prover_server`]: HTTP server around the reference evaluator

pub use prover_server;
pub use resolver_client;
pub use resolver_core;
