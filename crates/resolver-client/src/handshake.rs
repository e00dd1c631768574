//! Off-chain lookup handshake
//!
//! ```text
//! AwaitingRevert --trigger--> Evaluating --complete--> Answered
//!   resolve(name, query)        prover(ops, inputs)      callback(outputs, exit, carry)
//!   must revert with            retried only while       decoded per the query's
//!   OffchainLookup              the prover is transient  return type
//! ```
//!
//! Each state is its own type, so a resolution can only move forward. Any unexpected shape
//! from the resolving contract is a [`ClientError::ProtocolMismatch`].

use alloy_primitives::{Address, Bytes, FixedBytes};
use alloy_sol_types::{SolCall, SolError, SolValue};
use resolver_core::{EvalState, RecordKind};

use crate::abi::{self, OffchainLookup, RecordValue};
use crate::error::{ClientError, Result};
use crate::prover::{evaluate_with_retry, Prover};
use crate::rpc::{CallOutcome, ContractCaller};

type RequestTuple = (Bytes, Vec<Bytes>);
type ExtraData = (Address, Bytes, RequestTuple, FixedBytes<4>, Bytes);

/// Everything an `OffchainLookup` revert carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Contract that receives the callback
    pub sender: Address,
    pub urls: Vec<String>,
    pub target: Address,
    pub context: Bytes,
    pub ops: Bytes,
    pub inputs: Vec<Bytes>,
    pub callback: FixedBytes<4>,
    pub carry: Bytes,
}

impl Lookup {
    /// Decode revert data. Both copies of the request must agree.
    pub fn decode(revert: &[u8]) -> Result<Self> {
        let error = <OffchainLookup as SolError>::abi_decode(revert)
            .map_err(|e| ClientError::ProtocolMismatch(format!("expected OffchainLookup: {}", e)))?;

        let params = error.callData.get(4..).ok_or_else(|| {
            ClientError::ProtocolMismatch("lookup calldata shorter than a selector".into())
        })?;
        let (context, (ops, inputs)) = <(Bytes, RequestTuple)>::abi_decode_params(params)
            .map_err(|e| ClientError::ProtocolMismatch(format!("lookup calldata: {}", e)))?;

        let (target, _, (extra_ops, extra_inputs), callback, carry) =
            <ExtraData>::abi_decode(&error.extraData)
                .map_err(|e| ClientError::ProtocolMismatch(format!("lookup extra data: {}", e)))?;

        if extra_ops != ops || extra_inputs != inputs {
            return Err(ClientError::ProtocolMismatch(
                "request in calldata differs from request in extra data".into(),
            ));
        }

        Ok(Self {
            sender: error.sender,
            urls: error.urls,
            target,
            context,
            ops,
            inputs,
            callback,
            carry,
        })
    }

    /// Encode as revert data, the way a resolving contract would
    pub fn encode_revert(&self) -> Bytes {
        let request = (self.ops.clone(), self.inputs.clone());
        let mut call_data = abi::proveRequestCall::SELECTOR.to_vec();
        call_data.extend_from_slice(&(self.context.clone(), request.clone()).abi_encode_params());

        let extra: ExtraData = (
            self.target,
            self.context.clone(),
            request,
            self.callback,
            self.carry.clone(),
        );

        let error = OffchainLookup {
            sender: self.sender,
            urls: self.urls.clone(),
            callData: Bytes::from(call_data),
            callbackFunction: self.callback,
            extraData: Bytes::from(extra.abi_encode()),
        };
        Bytes::from(SolError::abi_encode(&error))
    }

    /// Callback calldata carrying the prover's answer
    pub fn callback_data(&self, state: &EvalState) -> Bytes {
        abi::callback_calldata(
            self.callback,
            state.resolve_outputs(),
            state.exit_code(),
            self.carry.clone(),
        )
    }
}

/// Final result of a lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Answered(RecordValue),
    /// The program aborted; the record is absent
    Aborted { exit_code: u8 },
}

/// First state: the resolving contract has not been called yet
#[derive(Debug, Clone)]
pub struct AwaitingRevert {
    resolver: Address,
    record: RecordKind,
    call_data: Bytes,
}

impl AwaitingRevert {
    pub fn new(resolver: Address, name: &str, record: RecordKind) -> Result<Self> {
        let call_data = abi::resolve_calldata(name, &record)?;
        Ok(Self {
            resolver,
            record,
            call_data,
        })
    }

    pub fn call_data(&self) -> &Bytes {
        &self.call_data
    }

    /// Call `resolve` and expect an `OffchainLookup` revert
    pub async fn trigger<C: ContractCaller>(self, caller: &C) -> Result<Evaluating> {
        let revert = match caller.call(self.resolver, self.call_data).await? {
            CallOutcome::Revert(data) => data,
            CallOutcome::Success(_) => {
                return Err(ClientError::ProtocolMismatch(
                    "resolve returned without OffchainLookup".into(),
                ))
            }
        };

        let lookup = Lookup::decode(&revert)?;

        tracing::debug!(
            resolver = %self.resolver,
            sender = %lookup.sender,
            ops = lookup.ops.len(),
            inputs = lookup.inputs.len(),
            "Received OffchainLookup"
        );

        Ok(Evaluating {
            lookup,
            record: self.record,
        })
    }
}

/// Second state: a decoded lookup waiting for the prover
#[derive(Debug, Clone)]
pub struct Evaluating {
    lookup: Lookup,
    record: RecordKind,
}

impl Evaluating {
    pub fn lookup(&self) -> &Lookup {
        &self.lookup
    }

    /// Evaluate the request, send the callback and decode its answer
    pub async fn complete<P: Prover, C: ContractCaller>(
        self,
        prover: &P,
        caller: &C,
        retries: u32,
    ) -> Result<Answered> {
        let state =
            evaluate_with_retry(prover, &self.lookup.ops, &self.lookup.inputs, retries).await?;
        let exit_code = state.exit_code();

        tracing::debug!(
            exit_code,
            outputs = state.output_count(),
            "Prover evaluated lookup"
        );

        let response = caller
            .call(self.lookup.sender, self.lookup.callback_data(&state))
            .await?;

        let outcome = match (response, exit_code) {
            (_, code) if code != 0 => LookupOutcome::Aborted { exit_code: code },
            (CallOutcome::Success(data), _) => {
                LookupOutcome::Answered(abi::decode_answer(&self.record, &data)?)
            }
            (CallOutcome::Revert(data), _) => {
                return Err(ClientError::ProtocolMismatch(format!(
                    "callback reverted: 0x{}",
                    hex::encode(data)
                )))
            }
        };

        tracing::debug!(record = %self.record, outcome = ?outcome, "Lookup answered");

        Ok(Answered {
            lookup: self.lookup,
            state,
            outcome,
        })
    }
}

/// Terminal state
#[derive(Debug, Clone)]
pub struct Answered {
    lookup: Lookup,
    state: EvalState,
    outcome: LookupOutcome,
}

impl Answered {
    pub fn lookup(&self) -> &Lookup {
        &self.lookup
    }

    pub fn state(&self) -> &EvalState {
        &self.state
    }

    pub fn outcome(&self) -> &LookupOutcome {
        &self.outcome
    }

    pub fn into_outcome(self) -> LookupOutcome {
        self.outcome
    }
}

/// Drives the whole handshake for one resolving contract
pub struct Handshake<C, P> {
    caller: C,
    prover: P,
    resolver: Address,
    retries: u32,
}

impl<C: ContractCaller, P: Prover> Handshake<C, P> {
    pub fn new(caller: C, prover: P, resolver: Address) -> Self {
        Self {
            caller,
            prover,
            resolver,
            retries: 0,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub async fn lookup(&self, name: &str, record: RecordKind) -> Result<LookupOutcome> {
        tracing::info!(name, record = %record, resolver = %self.resolver, "Starting lookup");

        let answered = AwaitingRevert::new(self.resolver, name, record)?
            .trigger(&self.caller)
            .await?
            .complete(&self.prover, &self.caller, self.retries)
            .await?;

        Ok(answered.into_outcome())
    }
}
