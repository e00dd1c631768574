//! Gateway requests: a top-level program with its inputs and declared outputs
//!
//! On the wire a request is two fields:
//!
//! ```text
//! ops    = output_count:u8 || program
//! inputs = bytes[]
//! ```

use std::ops::{Deref, DerefMut};

use alloy_primitives::Bytes;

use crate::program::{GatewayProgram, ProgramError};

/// Inputs are addressed by a one-byte index
pub const MAX_INPUTS: usize = u8::MAX as usize + 1;

/// Request builder. Dereferences to [`GatewayProgram`] for the operation methods.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    program: GatewayProgram,
    inputs: Vec<Bytes>,
    output_count: u8,
    overflowed: bool,
}

impl GatewayRequest {
    pub fn new(output_count: u8) -> Self {
        Self {
            program: GatewayProgram::new(),
            inputs: Vec::new(),
            output_count,
            overflowed: false,
        }
    }

    /// Register an input value and return its index
    pub fn add_input(&mut self, value: impl Into<Bytes>) -> u8 {
        if self.inputs.len() >= MAX_INPUTS {
            self.overflowed = true;
            return u8::MAX;
        }
        self.inputs.push(value.into());
        (self.inputs.len() - 1) as u8
    }

    /// Register an input value and push it
    pub fn push_value(&mut self, value: impl Into<Bytes>) -> &mut GatewayProgram {
        let index = self.add_input(value);
        self.program.push_input(index)
    }

    pub fn inputs(&self) -> &[Bytes] {
        &self.inputs
    }

    pub fn output_count(&self) -> u8 {
        self.output_count
    }

    /// Validate every input/output reference and freeze the request
    pub fn finish(self) -> Result<Request, ProgramError> {
        if self.overflowed {
            return Err(ProgramError::TooManyInputs { max: MAX_INPUTS });
        }

        if let Some(offset) = self.program.zero_exit() {
            return Err(ProgramError::ZeroExitCode { offset });
        }

        if let Some(&index) = self.program.reads_unwritten().iter().next() {
            return Err(ProgramError::OutputNotWritten(index));
        }

        if let Some(&index) = self
            .program
            .written()
            .iter()
            .find(|&&index| index >= self.output_count)
        {
            return Err(ProgramError::OutputOutOfRange {
                index,
                count: self.output_count,
            });
        }

        if let Some(&index) = self
            .program
            .inputs_used()
            .iter()
            .find(|&&index| index as usize >= self.inputs.len())
        {
            return Err(ProgramError::InputNotProvided {
                index,
                available: self.inputs.len(),
            });
        }

        let mut ops = Vec::with_capacity(1 + self.program.len() * 8);
        ops.push(self.output_count);
        ops.extend_from_slice(&self.program.encode());

        Ok(Request {
            ops: Bytes::from(ops),
            inputs: self.inputs,
        })
    }
}

impl Deref for GatewayRequest {
    type Target = GatewayProgram;

    fn deref(&self) -> &Self::Target {
        &self.program
    }
}

impl DerefMut for GatewayRequest {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.program
    }
}

/// An assembled, validated request in wire form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub ops: Bytes,
    pub inputs: Vec<Bytes>,
}

impl Request {
    pub fn output_count(&self) -> u8 {
        self.ops.first().copied().unwrap_or(0)
    }

    /// Program bytes without the output count header
    pub fn program_bytes(&self) -> &[u8] {
        self.ops.get(1..).unwrap_or(&[])
    }
}

/// Split wire `ops` into `(output_count, program)`
pub fn split_header(ops: &[u8]) -> Result<(u8, &[u8]), ProgramError> {
    ops.split_first()
        .map(|(count, program)| (*count, program))
        .ok_or(ProgramError::MissingHeader)
}
