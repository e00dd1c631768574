//! Reference evaluator for gateway programs
//!
//! Executes a request against a [`StateReader`] snapshot with Solidity storage semantics.
//! A real prover performs the same walk against a block and proves every slot it touches;
//! this evaluator only produces the outputs, which makes it suitable for tests, local
//! demos and for checking a prover's answers.
//!
//! ## Sub-programs
//!
//! `EVAL` pops an encoded program and runs it in a child frame that starts with a copy of
//! the parent's stack, target and slot, and shares the request's inputs and outputs.
//!
//! | Child result | Parent stack afterwards          |
//! |--------------|----------------------------------|
//! | completed    | child's final stack, then `0`    |
//! | aborted (n)  | unchanged, then `n`              |
//!
//! Registers never propagate back to the parent. An assertion failure in the top-level
//! program ends evaluation with its exit code.

use alloy_primitives::{Address, Bytes, B256, U256};
use thiserror::Error;

use crate::keys::{keccak256, mapping_slot};
use crate::program::{decode_ops, Op, ProgramError};
use crate::request::split_header;
use crate::state::StateReader;

/// Maximum nesting of `EVAL`
pub const MAX_EVAL_DEPTH: usize = 16;

/// Maximum stack height
pub const MAX_STACK: usize = 1024;

/// Maximum length of a `bytes` value read from storage
pub const MAX_READ_BYTES: usize = 1 << 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("Malformed program: {0}")]
    Program(#[from] ProgramError),

    #[error("Stack underflow")]
    StackUnderflow,

    #[error("Stack overflow (max {MAX_STACK})")]
    StackOverflow,

    #[error("Input {0} out of range")]
    InputOutOfRange(u8),

    #[error("Output {0} out of range")]
    OutputOutOfRange(u8),

    #[error("Operand of {len} bytes is not a word")]
    NotAWord { len: usize },

    #[error("Stored bytes value too large: {len} bytes")]
    ValueTooLarge { len: U256 },

    #[error("Eval depth exceeds {MAX_EVAL_DEPTH}")]
    DepthExceeded,
}

/// Result of evaluating a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalState {
    outputs: Vec<Option<Bytes>>,
    exit_code: u8,
}

impl EvalState {
    pub fn new(outputs: Vec<Option<Bytes>>, exit_code: u8) -> Self {
        Self { outputs, exit_code }
    }

    /// 0 on normal completion, otherwise the code of the failed assertion
    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn is_aborted(&self) -> bool {
        self.exit_code != 0
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Output `index`, or `None` if no operation wrote it
    pub fn output(&self, index: usize) -> Option<&Bytes> {
        self.outputs.get(index).and_then(Option::as_ref)
    }

    /// Force outputs into plain byte strings; unwritten outputs become empty
    pub fn resolve_outputs(&self) -> Vec<Bytes> {
        self.outputs
            .iter()
            .map(|output| output.clone().unwrap_or_default())
            .collect()
    }
}

/// Reference evaluator bound to one snapshot
pub struct Machine<'a, S: StateReader + ?Sized> {
    state: &'a S,
}

impl<'a, S: StateReader + ?Sized> Machine<'a, S> {
    pub fn new(state: &'a S) -> Self {
        Self { state }
    }

    /// Evaluate wire-form `ops` (`output_count || program`) with the given inputs
    pub fn evaluate(&self, ops: &[u8], inputs: &[Bytes]) -> Result<EvalState, VmError> {
        let (output_count, program) = split_header(ops)?;
        let program = decode_ops(program)?;

        let mut run = Run {
            state: self.state,
            inputs,
            outputs: vec![None; output_count as usize],
        };
        let mut frame = Frame::default();
        let exit_code = run.exec(&program, &mut frame, 0)?;

        tracing::debug!(
            ops = program.len(),
            outputs = output_count,
            exit_code,
            "Evaluated program"
        );

        Ok(EvalState::new(run.outputs, exit_code))
    }
}

#[derive(Debug, Clone, Default)]
struct Frame {
    target: Address,
    slot: U256,
    stack: Vec<Bytes>,
}

impl Frame {
    fn push(&mut self, value: Bytes) -> Result<(), VmError> {
        if self.stack.len() >= MAX_STACK {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn push_u256(&mut self, value: U256) -> Result<(), VmError> {
        self.push(Bytes::copy_from_slice(&value.to_be_bytes::<32>()))
    }

    fn push_bool(&mut self, value: bool) -> Result<(), VmError> {
        self.push_u256(U256::from(value as u8))
    }

    fn pop(&mut self) -> Result<Bytes, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn pop_u256(&mut self) -> Result<U256, VmError> {
        let value = self.pop()?;
        U256::try_from_be_slice(&value).ok_or(VmError::NotAWord { len: value.len() })
    }

    /// Pops `(below, top)`
    fn pop_pair(&mut self) -> Result<(U256, U256), VmError> {
        let top = self.pop_u256()?;
        let below = self.pop_u256()?;
        Ok((below, top))
    }
}

fn is_nonzero(value: &[u8]) -> bool {
    value.iter().any(|&b| b != 0)
}

struct Run<'a, S: StateReader + ?Sized> {
    state: &'a S,
    inputs: &'a [Bytes],
    outputs: Vec<Option<Bytes>>,
}

impl<S: StateReader + ?Sized> Run<'_, S> {
    fn exec(&mut self, ops: &[Op], frame: &mut Frame, depth: usize) -> Result<u8, VmError> {
        for op in ops {
            match op {
                Op::PushBytes(value) => frame.push(value.clone())?,
                Op::PushInput(index) => {
                    let value = self
                        .inputs
                        .get(*index as usize)
                        .cloned()
                        .ok_or(VmError::InputOutOfRange(*index))?;
                    frame.push(value)?;
                }
                Op::PushOutput(index) => {
                    let value = self
                        .outputs
                        .get(*index as usize)
                        .ok_or(VmError::OutputOutOfRange(*index))?
                        .clone()
                        .unwrap_or_default();
                    frame.push(value)?;
                }
                Op::SetTarget => {
                    let word = frame.pop_u256()?;
                    frame.target = Address::from_word(B256::from(word.to_be_bytes::<32>()));
                }
                Op::SetSlot => frame.slot = frame.pop_u256()?,
                Op::AddSlot => {
                    let n = frame.pop_u256()?;
                    frame.slot = frame.slot.wrapping_add(n);
                }
                Op::Follow => {
                    let key = frame.pop()?;
                    frame.slot = mapping_slot(&key, frame.slot);
                }
                Op::Read => {
                    let word = self.state.storage(frame.target, frame.slot);
                    frame.push(Bytes::copy_from_slice(word.as_slice()))?;
                }
                Op::ReadBytes => {
                    let value = self.read_bytes(frame.target, frame.slot)?;
                    frame.push(value)?;
                }
                Op::Keccak => {
                    let value = frame.pop()?;
                    frame.push(Bytes::copy_from_slice(keccak256(&value).as_slice()))?;
                }
                Op::Dup(depth) => {
                    let index = frame
                        .stack
                        .len()
                        .checked_sub(1 + *depth as usize)
                        .ok_or(VmError::StackUnderflow)?;
                    let value = frame.stack[index].clone();
                    frame.push(value)?;
                }
                Op::Pop => {
                    frame.pop()?;
                }
                Op::And => {
                    let (below, top) = frame.pop_pair()?;
                    frame.push_u256(below & top)?;
                }
                Op::IsZero => {
                    let value = frame.pop()?;
                    frame.push_bool(!is_nonzero(&value))?;
                }
                Op::Eq => {
                    let (below, top) = frame.pop_pair()?;
                    frame.push_bool(below == top)?;
                }
                Op::Lte => {
                    let (below, top) = frame.pop_pair()?;
                    frame.push_bool(below <= top)?;
                }
                Op::Gte => {
                    let (below, top) = frame.pop_pair()?;
                    frame.push_bool(below >= top)?;
                }
                Op::AssertNonzero(exit_code) => {
                    let value = frame.pop()?;
                    if !is_nonzero(&value) {
                        tracing::trace!(depth, exit_code, "Assertion failed");
                        return Ok(*exit_code);
                    }
                }
                Op::SetOutput(index) => {
                    let value = frame.pop()?;
                    let slot = self
                        .outputs
                        .get_mut(*index as usize)
                        .ok_or(VmError::OutputOutOfRange(*index))?;
                    *slot = Some(value);
                }
                Op::Eval => {
                    if depth + 1 > MAX_EVAL_DEPTH {
                        return Err(VmError::DepthExceeded);
                    }
                    let program = decode_ops(&frame.pop()?)?;

                    let mut child = frame.clone();
                    let status = self.exec(&program, &mut child, depth + 1)?;
                    if status == 0 {
                        frame.stack = child.stack;
                    }
                    frame.push_u256(U256::from(status))?;
                }
            }
        }

        Ok(0)
    }

    fn read_bytes(&self, target: Address, slot: U256) -> Result<Bytes, VmError> {
        let header = self.state.storage(target, slot);

        if header[31] & 1 == 0 {
            let len = (header[31] / 2) as usize;
            if len >= 32 {
                return Err(VmError::ValueTooLarge { len: U256::from(len) });
            }
            return Ok(Bytes::copy_from_slice(&header[..len]));
        }

        let len = (U256::from_be_bytes(header.0) - U256::from(1)) / U256::from(2);
        if len > U256::from(MAX_READ_BYTES) {
            return Err(VmError::ValueTooLarge { len });
        }
        let len = len.to::<usize>();

        let base = U256::from_be_bytes(keccak256(&slot.to_be_bytes::<32>()).0);
        let mut value = Vec::with_capacity(len.div_ceil(32) * 32);
        for i in 0..len.div_ceil(32) {
            let word = self.state.storage(target, base.wrapping_add(U256::from(i)));
            value.extend_from_slice(word.as_slice());
        }
        value.truncate(len);

        Ok(Bytes::from(value))
    }
}
