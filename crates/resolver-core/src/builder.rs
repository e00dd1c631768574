//! Resolution program builder
//!
//! Builds one request that reads both interpretations of a name and lets the caller pick
//! the right one after evaluation, from the link descriptor:
//!
//! ```text
//! out0  links[controller][node(basename)]                     link descriptor
//! out1  namespaces[controller][node(basename)]                owned namespace
//! out2  records[out1][node(owned_fragment)][key]              owned record
//! ---- only when a token label is present, inside EVAL ----
//! out3  delegated namespace for (mediator(out0), token)       guarded nonzero
//! out4  records[out3][node(token_fragment)][key]              delegated record
//! out5  sub-program exit status
//! ```
//!
//! The delegated branch is a sub-program so a missing or expired delegation aborts only
//! that branch. The owned branch is always read.
//!
//! Chain-specific EVM addresses (ENSIP-19) read the default EVM address when their own
//! record is empty. Each record read is then followed by a nested sub-program that aborts
//! when the record is present and otherwise replaces it with the default record.

use alloy_primitives::{Address, Bytes, B256, U256};

use crate::config::StorageLayout;
use crate::keys::{fragment_key, namehash, RecordKind};
use crate::names::{Decomposition, Token};
use crate::program::GatewayProgram;
use crate::request::{GatewayRequest, Request};
use crate::vm::EvalState;
use crate::{Error, Result};

pub const OUTPUT_LINK: u8 = 0;
pub const OUTPUT_OWNED_NAMESPACE: u8 = 1;
pub const OUTPUT_OWNED_RECORD: u8 = 2;
pub const OUTPUT_DELEGATED_NAMESPACE: u8 = 3;
pub const OUTPUT_DELEGATED_RECORD: u8 = 4;
pub const OUTPUT_DELEGATION_STATUS: u8 = 5;

/// Number of outputs every resolution request declares
pub const OUTPUT_COUNT: u8 = 6;

/// Delegated namespace is zero
pub const EXIT_NO_DELEGATION: u8 = 1;

/// Lease expiry is before the supplied time
pub const EXIT_LEASE_EXPIRED: u8 = 2;

/// The record is set, so no fallback read happens
pub const EXIT_RECORD_PRESENT: u8 = 3;

/// Low 160 bits of a word
pub const ADDRESS_MASK: U256 = U256::from_limbs([u64::MAX, u64::MAX, u32::MAX as u64, 0]);

/// Where the delegated namespace of a token lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delegation {
    /// `namespaces[mediator][token]` on the registry
    #[default]
    Registry,
    /// `leases[token] = { expiry, ns }` on the mediator, valid while `now <= expiry`
    Leased { now: u64 },
}

/// Link descriptor stored for a basename
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// The controller owns the namespace directly
    Owned,
    /// Resolution is delegated to a token-owning mediator contract
    Tokenized { link_type: U256, mediator: Address },
}

impl Link {
    /// `link_type = word >> 160`, `mediator = word & ADDRESS_MASK`
    pub fn from_word(word: U256) -> Self {
        let link_type = word >> 160usize;
        if link_type.is_zero() {
            return Link::Owned;
        }

        let mediator =
            Address::from_word(B256::from((word & ADDRESS_MASK).to_be_bytes::<32>()));
        Link::Tokenized { link_type, mediator }
    }

    pub fn to_word(&self) -> U256 {
        match self {
            Link::Owned => U256::ZERO,
            Link::Tokenized { link_type, mediator } => {
                (*link_type << 160usize) | U256::from_be_slice(mediator.as_slice())
            }
        }
    }

    pub fn is_tokenized(&self) -> bool {
        matches!(self, Link::Tokenized { .. })
    }
}

/// What happened to the delegated branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationStatus {
    /// No token label, or the basename is owned
    NotRequested,
    /// The delegated namespace was used
    Active,
    /// Tokenized link without a usable delegation
    Absent { exit_code: u8 },
}

/// A record value together with how it was reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecord {
    pub link: Link,
    pub namespace: Option<U256>,
    pub value: Bytes,
    pub delegation: DelegationStatus,
}

impl ResolvedRecord {
    /// True when no record is stored
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Builds resolution requests against one registry contract
#[derive(Debug, Clone)]
pub struct ResolutionBuilder {
    registry: Address,
    layout: StorageLayout,
    delegation: Delegation,
}

impl ResolutionBuilder {
    pub fn new(registry: Address) -> Self {
        Self {
            registry,
            layout: StorageLayout::default(),
            delegation: Delegation::default(),
        }
    }

    pub fn with_layout(mut self, layout: StorageLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_delegation(mut self, delegation: Delegation) -> Self {
        self.delegation = delegation;
        self
    }

    pub fn registry(&self) -> Address {
        self.registry
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn delegation(&self) -> Delegation {
        self.delegation
    }

    pub fn build(&self, decomposition: &Decomposition, record: &RecordKind) -> Result<Request> {
        self.build_request(
            decomposition,
            RecordRead {
                key: record.storage_key(),
                fallback: record.fallback_key(),
            },
        )
    }

    /// Build the request for an arbitrary record key, without fallback
    pub fn build_for_key(&self, decomposition: &Decomposition, key: B256) -> Result<Request> {
        self.build_request(decomposition, RecordRead { key, fallback: None })
    }

    fn build_request(&self, decomposition: &Decomposition, read: RecordRead) -> Result<Request> {
        let layout = &self.layout;
        let node = namehash(&decomposition.basename);

        let mut req = GatewayRequest::new(OUTPUT_COUNT);
        req.set_target(self.registry)
            .set_slot(layout.links_slot())
            .push_address(decomposition.controller)
            .follow()
            .push_word(node)
            .follow()
            .read()
            .set_output(OUTPUT_LINK)
            .set_slot(layout.namespaces_slot())
            .push_address(decomposition.controller)
            .follow()
            .push_word(node)
            .follow()
            .read()
            .set_output(OUTPUT_OWNED_NAMESPACE);
        self.read_record(
            &mut req,
            OUTPUT_OWNED_NAMESPACE,
            &decomposition.owned_fragment,
            &read,
        )
        .set_output(OUTPUT_OWNED_RECORD);

        if let Some(token) = &decomposition.token {
            let branch = self.delegated_branch(&mut req, token, &read);
            req.push_program(&branch)
                .eval()
                .set_output(OUTPUT_DELEGATION_STATUS);
        }

        let request = req.finish()?;

        tracing::debug!(
            basename = %decomposition.basename,
            fragment = %decomposition.owned_fragment,
            tokenized = decomposition.token.is_some(),
            fallback = read.fallback.is_some(),
            delegation = ?self.delegation,
            ops = request.ops.len(),
            "Built resolution request"
        );

        Ok(request)
    }

    /// Leaves `records[outputs[ns_output]][node(fragment)][key]` on the stack, or the
    /// fallback record when that is empty
    fn read_record<'p>(
        &self,
        program: &'p mut GatewayProgram,
        ns_output: u8,
        fragment: &str,
        read: &RecordRead,
    ) -> &'p mut GatewayProgram {
        self.read_slot(program, ns_output, fragment, read.key);

        if let Some(fallback) = read.fallback {
            let mut child = GatewayProgram::new();
            child
                .dup()
                .is_zero()
                .assert_nonzero(EXIT_RECORD_PRESENT)
                .pop();
            self.read_slot(&mut child, ns_output, fragment, fallback);

            // the status is discarded; an abort keeps the primary record
            program.push_program(&child).eval().pop();
        }
        program
    }

    fn read_slot<'p>(
        &self,
        program: &'p mut GatewayProgram,
        ns_output: u8,
        fragment: &str,
        key: B256,
    ) -> &'p mut GatewayProgram {
        program
            .set_slot(self.layout.records_slot())
            .push_output(ns_output)
            .follow()
            .push_word(fragment_key(fragment))
            .follow()
            .push_word(key)
            .follow()
            .read_bytes()
    }

    fn delegated_branch(
        &self,
        req: &mut GatewayRequest,
        token: &Token,
        read: &RecordRead,
    ) -> GatewayProgram {
        let mut branch = GatewayProgram::new();
        branch
            .push_output(OUTPUT_LINK)
            .push_u256(ADDRESS_MASK)
            .and();

        match self.delegation {
            Delegation::Registry => {
                branch
                    .set_slot(self.layout.namespaces_slot())
                    .follow()
                    .push_word(token.id)
                    .follow()
                    .read();
            }
            Delegation::Leased { now } => {
                let now = req.add_input(Bytes::copy_from_slice(
                    &U256::from(now).to_be_bytes::<32>(),
                ));
                branch
                    .target()
                    .set_slot(self.layout.leases_slot())
                    .push_word(token.id)
                    .follow()
                    .push_input(now)
                    .read()
                    .lte()
                    .assert_nonzero(EXIT_LEASE_EXPIRED)
                    .offset(1)
                    .read();
            }
        }

        branch
            .dup()
            .assert_nonzero(EXIT_NO_DELEGATION)
            .set_output(OUTPUT_DELEGATED_NAMESPACE)
            .set_target(self.registry);
        self.read_record(
            &mut branch,
            OUTPUT_DELEGATED_NAMESPACE,
            &token.fragment,
            read,
        )
        .set_output(OUTPUT_DELEGATED_RECORD);

        branch
    }
}

/// Record key to read, and the key read instead when that record is empty
#[derive(Debug, Clone, Copy)]
struct RecordRead {
    key: B256,
    fallback: Option<B256>,
}

fn output_word(outputs: &[Bytes], index: u8) -> Result<U256> {
    let value = outputs
        .get(index as usize)
        .ok_or(Error::UnexpectedOutput { index, len: 0 })?;
    U256::try_from_be_slice(value).ok_or(Error::UnexpectedOutput {
        index,
        len: value.len(),
    })
}

fn output_bytes(outputs: &[Bytes], index: u8) -> Bytes {
    outputs.get(index as usize).cloned().unwrap_or_default()
}

fn exit_status(word: U256) -> u8 {
    if word > U256::from(u8::MAX) {
        u8::MAX
    } else {
        word.as_limbs()[0] as u8
    }
}

/// Choose the branch the link descriptor points at
pub fn select(decomposition: &Decomposition, state: &EvalState) -> Result<ResolvedRecord> {
    if state.is_aborted() {
        return Err(Error::Aborted(state.exit_code()));
    }

    let outputs = state.resolve_outputs();
    let link = Link::from_word(output_word(&outputs, OUTPUT_LINK)?);

    let resolved = match (link, &decomposition.token) {
        (Link::Tokenized { .. }, Some(_)) => {
            let status = exit_status(output_word(&outputs, OUTPUT_DELEGATION_STATUS)?);
            let namespace = if status == 0 {
                output_word(&outputs, OUTPUT_DELEGATED_NAMESPACE)?
            } else {
                U256::ZERO
            };

            if namespace.is_zero() {
                let exit_code = if status == 0 { EXIT_NO_DELEGATION } else { status };
                ResolvedRecord {
                    link,
                    namespace: None,
                    value: Bytes::new(),
                    delegation: DelegationStatus::Absent { exit_code },
                }
            } else {
                ResolvedRecord {
                    link,
                    namespace: Some(namespace),
                    value: output_bytes(&outputs, OUTPUT_DELEGATED_RECORD),
                    delegation: DelegationStatus::Active,
                }
            }
        }
        _ => {
            let namespace = output_word(&outputs, OUTPUT_OWNED_NAMESPACE)?;
            ResolvedRecord {
                link,
                namespace: (!namespace.is_zero()).then_some(namespace),
                value: output_bytes(&outputs, OUTPUT_OWNED_RECORD),
                delegation: DelegationStatus::NotRequested,
            }
        }
    };

    tracing::debug!(
        basename = %decomposition.basename,
        tokenized = link.is_tokenized(),
        delegation = ?resolved.delegation,
        len = resolved.value.len(),
        "Selected resolution branch"
    );

    Ok(resolved)
}
