//! Core error types

use thiserror::Error;

use crate::program::ProgramError;
use crate::vm::VmError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No basename matches name: {0}")]
    NoBasenameMatch(String),

    #[error("Invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Program error: {0}")]
    Program(#[from] ProgramError),

    #[error("Evaluation error: {0}")]
    Vm(#[from] VmError),

    #[error("Output {index} is not a word ({len} bytes)")]
    UnexpectedOutput { index: u8, len: usize },

    #[error("Resolution program aborted with exit code {0}")]
    Aborted(u8),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
