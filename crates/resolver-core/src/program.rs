//! Gateway program assembler
//!
//! A program is a flat list of stack-machine operations that addresses remote contract
//! storage. Programs are pure descriptions: nothing touches the chain until a prover
//! evaluates them.
//!
//! ## Wire Format
//!
//! Each operation is a one-byte opcode followed by its immediate, if any:
//!
//! ```text
//! PUSH_BYTES   0x01 len:u32be bytes[len]
//! PUSH_INPUT   0x02 index:u8
//! PUSH_OUTPUT  0x03 index:u8
//! DUP          0x31 depth:u8
//! ASSERT_NZ    0x50 exit:u8
//! SET_OUTPUT   0x51 index:u8
//! (all other opcodes carry no immediate)
//! ```
//!
//! A program embeds another program as a `PUSH_BYTES` literal followed by `EVAL`.

use std::collections::BTreeSet;

use alloy_primitives::{Address, Bytes, B256, U256};
use thiserror::Error;

/// Opcode table
pub mod opcodes {
    pub const PUSH_BYTES: u8 = 0x01;
    pub const PUSH_INPUT: u8 = 0x02;
    pub const PUSH_OUTPUT: u8 = 0x03;

    pub const SET_TARGET: u8 = 0x10;
    pub const SET_SLOT: u8 = 0x11;
    pub const ADD_SLOT: u8 = 0x12;
    pub const FOLLOW: u8 = 0x13;

    pub const READ: u8 = 0x20;
    pub const READ_BYTES: u8 = 0x21;

    pub const KECCAK: u8 = 0x30;
    pub const DUP: u8 = 0x31;
    pub const POP: u8 = 0x32;

    pub const AND: u8 = 0x40;
    pub const IS_ZERO: u8 = 0x41;
    pub const EQ: u8 = 0x42;
    pub const LTE: u8 = 0x43;
    pub const GTE: u8 = 0x44;

    pub const ASSERT_NONZERO: u8 = 0x50;
    pub const SET_OUTPUT: u8 = 0x51;
    pub const EVAL: u8 = 0x52;
}

/// A single stack-machine operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    PushBytes(Bytes),
    PushInput(u8),
    PushOutput(u8),
    SetTarget,
    SetSlot,
    AddSlot,
    Follow,
    Read,
    ReadBytes,
    Keccak,
    Dup(u8),
    Pop,
    And,
    IsZero,
    Eq,
    Lte,
    Gte,
    AssertNonzero(u8),
    SetOutput(u8),
    Eval,
}

impl Op {
    pub fn opcode(&self) -> u8 {
        use opcodes::*;
        match self {
            Op::PushBytes(_) => PUSH_BYTES,
            Op::PushInput(_) => PUSH_INPUT,
            Op::PushOutput(_) => PUSH_OUTPUT,
            Op::SetTarget => SET_TARGET,
            Op::SetSlot => SET_SLOT,
            Op::AddSlot => ADD_SLOT,
            Op::Follow => FOLLOW,
            Op::Read => READ,
            Op::ReadBytes => READ_BYTES,
            Op::Keccak => KECCAK,
            Op::Dup(_) => DUP,
            Op::Pop => POP,
            Op::And => AND,
            Op::IsZero => IS_ZERO,
            Op::Eq => EQ,
            Op::Lte => LTE,
            Op::Gte => GTE,
            Op::AssertNonzero(_) => ASSERT_NONZERO,
            Op::SetOutput(_) => SET_OUTPUT,
            Op::Eval => EVAL,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("Input {index} referenced but only {available} inputs provided")]
    InputNotProvided { index: u8, available: usize },

    #[error("Output {index} out of range (request declares {count} outputs)")]
    OutputOutOfRange { index: u8, count: u8 },

    #[error("Output {0} read before any operation writes it")]
    OutputNotWritten(u8),

    #[error("Too many inputs (max {max})")]
    TooManyInputs { max: usize },

    #[error("Unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("Truncated operation at offset {offset}")]
    Truncated { offset: usize },

    #[error("Missing output count header")]
    MissingHeader,

    #[error("Assertion exit code must be nonzero (offset {offset})")]
    ZeroExitCode { offset: usize },
}

/// Fluent program builder.
///
/// Besides the operations it tracks which inputs and outputs the program depends on, so
/// that a [`GatewayRequest`](crate::GatewayRequest) can reject references to values that
/// will never exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayProgram {
    ops: Vec<Op>,
    /// Outputs this program (or an embedded program) writes
    written: BTreeSet<u8>,
    /// Outputs read before this program writes them
    reads_unwritten: BTreeSet<u8>,
    /// Inputs referenced anywhere in the program
    inputs_used: BTreeSet<u8>,
    /// Byte offset of the first `assert_nonzero(0)`, which could not be told apart from
    /// success
    zero_exit: Option<usize>,
}

impl GatewayProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn written(&self) -> &BTreeSet<u8> {
        &self.written
    }

    pub(crate) fn reads_unwritten(&self) -> &BTreeSet<u8> {
        &self.reads_unwritten
    }

    pub(crate) fn inputs_used(&self) -> &BTreeSet<u8> {
        &self.inputs_used
    }

    pub(crate) fn zero_exit(&self) -> Option<usize> {
        self.zero_exit
    }

    fn op(&mut self, op: Op) -> &mut Self {
        self.ops.push(op);
        self
    }

    // Operands

    pub fn push_bytes(&mut self, value: impl Into<Bytes>) -> &mut Self {
        self.op(Op::PushBytes(value.into()))
    }

    pub fn push_str(&mut self, value: &str) -> &mut Self {
        self.push_bytes(Bytes::copy_from_slice(value.as_bytes()))
    }

    pub fn push_word(&mut self, word: B256) -> &mut Self {
        self.push_bytes(Bytes::copy_from_slice(word.as_slice()))
    }

    pub fn push_u256(&mut self, value: U256) -> &mut Self {
        self.push_word(B256::from(value.to_be_bytes::<32>()))
    }

    pub fn push_u64(&mut self, value: u64) -> &mut Self {
        self.push_u256(U256::from(value))
    }

    /// Push an address as a left-padded 32-byte word
    pub fn push_address(&mut self, address: Address) -> &mut Self {
        self.push_word(address.into_word())
    }

    pub fn push_input(&mut self, index: u8) -> &mut Self {
        self.inputs_used.insert(index);
        self.op(Op::PushInput(index))
    }

    pub fn push_output(&mut self, index: u8) -> &mut Self {
        if !self.written.contains(&index) {
            self.reads_unwritten.insert(index);
        }
        self.op(Op::PushOutput(index))
    }

    /// Embed another program as a single operand; follow with [`eval`](Self::eval)
    pub fn push_program(&mut self, program: &GatewayProgram) -> &mut Self {
        self.merge_dependencies(program);
        self.push_bytes(program.encode())
    }

    fn merge_dependencies(&mut self, program: &GatewayProgram) {
        for index in program.reads_unwritten() {
            if !self.written.contains(index) {
                self.reads_unwritten.insert(*index);
            }
        }
        self.inputs_used.extend(program.inputs_used().iter().copied());
        self.written.extend(program.written().iter().copied());
        if self.zero_exit.is_none() {
            // nested offset: past this program's ops and the PUSH_BYTES header
            let base = self.encode().len() + 5;
            self.zero_exit = program.zero_exit().map(|offset| base + offset);
        }
    }

    // Registers

    /// Pop an address into the target register
    pub fn target(&mut self) -> &mut Self {
        self.op(Op::SetTarget)
    }

    pub fn set_target(&mut self, address: Address) -> &mut Self {
        self.push_address(address).target()
    }

    /// Pop a word into the slot register
    pub fn slot(&mut self) -> &mut Self {
        self.op(Op::SetSlot)
    }

    pub fn set_slot(&mut self, slot: U256) -> &mut Self {
        self.push_u256(slot).slot()
    }

    /// Advance the slot register by `n` slots
    pub fn offset(&mut self, n: u64) -> &mut Self {
        self.push_u64(n).op(Op::AddSlot)
    }

    /// Descend into `mapping[top]` rooted at the current slot
    pub fn follow(&mut self) -> &mut Self {
        self.op(Op::Follow)
    }

    // Reads

    pub fn read(&mut self) -> &mut Self {
        self.op(Op::Read)
    }

    /// Read a Solidity `bytes`/`string` value stored at the current slot
    pub fn read_bytes(&mut self) -> &mut Self {
        self.op(Op::ReadBytes)
    }

    // Stack

    pub fn keccak(&mut self) -> &mut Self {
        self.op(Op::Keccak)
    }

    pub fn dup(&mut self) -> &mut Self {
        self.dup_n(0)
    }

    pub fn dup_n(&mut self, depth: u8) -> &mut Self {
        self.op(Op::Dup(depth))
    }

    pub fn pop(&mut self) -> &mut Self {
        self.op(Op::Pop)
    }

    pub fn and(&mut self) -> &mut Self {
        self.op(Op::And)
    }

    pub fn is_zero(&mut self) -> &mut Self {
        self.op(Op::IsZero)
    }

    pub fn eq(&mut self) -> &mut Self {
        self.op(Op::Eq)
    }

    /// `below <= top`
    pub fn lte(&mut self) -> &mut Self {
        self.op(Op::Lte)
    }

    /// `below >= top`
    pub fn gte(&mut self) -> &mut Self {
        self.op(Op::Gte)
    }

    // Control

    /// Pop a value; if it is zero, abort the enclosing program with `exit_code`.
    ///
    /// Exit code 0 means success, so `assert_nonzero(0)` makes the request fail to
    /// [`finish`](crate::GatewayRequest::finish).
    pub fn assert_nonzero(&mut self, exit_code: u8) -> &mut Self {
        if exit_code == 0 && self.zero_exit.is_none() {
            self.zero_exit = Some(self.encode().len());
        }
        self.op(Op::AssertNonzero(exit_code))
    }

    pub fn set_output(&mut self, index: u8) -> &mut Self {
        self.written.insert(index);
        self.op(Op::SetOutput(index))
    }

    /// Pop a program and evaluate it in a sub-scope, then push its exit status
    pub fn eval(&mut self) -> &mut Self {
        self.op(Op::Eval)
    }

    /// Serialize to the portable wire format
    pub fn encode(&self) -> Vec<u8> {
        encode_ops(&self.ops)
    }

    /// Parse the wire format back into a program.
    ///
    /// Operands that are evaluated directly (`PUSH_BYTES` followed by `EVAL`) are decoded
    /// too, so the result carries the same dependencies as the program that was encoded.
    pub fn decode(data: &[u8]) -> Result<Self, ProgramError> {
        let mut program = Self::new();
        let mut ops = decode_ops(data)?.into_iter().peekable();
        while let Some(op) = ops.next() {
            match op {
                Op::PushInput(index) => program.push_input(index),
                Op::PushOutput(index) => program.push_output(index),
                Op::SetOutput(index) => program.set_output(index),
                Op::PushBytes(value) if ops.peek() == Some(&Op::Eval) => {
                    let child = Self::decode(&value)?;
                    program.merge_dependencies(&child);
                    program.op(Op::PushBytes(value))
                }
                op => program.op(op),
            };
        }
        Ok(program)
    }
}

pub fn encode_ops(ops: &[Op]) -> Vec<u8> {
    let mut out = Vec::new();
    for op in ops {
        out.push(op.opcode());
        match op {
            Op::PushBytes(value) => {
                out.extend_from_slice(&(value.len() as u32).to_be_bytes());
                out.extend_from_slice(value);
            }
            Op::PushInput(i)
            | Op::PushOutput(i)
            | Op::Dup(i)
            | Op::AssertNonzero(i)
            | Op::SetOutput(i) => out.push(*i),
            _ => {}
        }
    }
    out
}

pub fn decode_ops(data: &[u8]) -> Result<Vec<Op>, ProgramError> {
    use opcodes::*;

    let mut ops = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let offset = pos;
        let opcode = data[pos];
        pos += 1;

        let op = match opcode {
            PUSH_INPUT => Op::PushInput(read_imm(data, &mut pos, offset)?),
            PUSH_OUTPUT => Op::PushOutput(read_imm(data, &mut pos, offset)?),
            DUP => Op::Dup(read_imm(data, &mut pos, offset)?),
            ASSERT_NONZERO => match read_imm(data, &mut pos, offset)? {
                0 => return Err(ProgramError::ZeroExitCode { offset }),
                exit_code => Op::AssertNonzero(exit_code),
            },
            SET_OUTPUT => Op::SetOutput(read_imm(data, &mut pos, offset)?),
            PUSH_BYTES => {
                let len_bytes: [u8; 4] = data
                    .get(pos..pos + 4)
                    .and_then(|s| s.try_into().ok())
                    .ok_or(ProgramError::Truncated { offset })?;
                let len = u32::from_be_bytes(len_bytes) as usize;
                pos += 4;

                let end = pos.checked_add(len).ok_or(ProgramError::Truncated { offset })?;
                let value = data.get(pos..end).ok_or(ProgramError::Truncated { offset })?;
                pos = end;
                Op::PushBytes(Bytes::copy_from_slice(value))
            }
            SET_TARGET => Op::SetTarget,
            SET_SLOT => Op::SetSlot,
            ADD_SLOT => Op::AddSlot,
            FOLLOW => Op::Follow,
            READ => Op::Read,
            READ_BYTES => Op::ReadBytes,
            KECCAK => Op::Keccak,
            POP => Op::Pop,
            AND => Op::And,
            IS_ZERO => Op::IsZero,
            EQ => Op::Eq,
            LTE => Op::Lte,
            GTE => Op::Gte,
            EVAL => Op::Eval,
            opcode => return Err(ProgramError::UnknownOpcode { opcode, offset }),
        };
        ops.push(op);
    }

    Ok(ops)
}

fn read_imm(data: &[u8], pos: &mut usize, offset: usize) -> Result<u8, ProgramError> {
    let value = *data.get(*pos).ok_or(ProgramError::Truncated { offset })?;
    *pos += 1;
    Ok(value)
}
