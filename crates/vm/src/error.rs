//! Runtime error type.
//!
//! Unlike a [`stepc_compiler::CompileError`], a runtime error has no source
//! position to report, only the condition the guardian or an opcode's
//! precondition found violated, at the instruction pointer where it was
//! raised.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub message: String,
    pub ip: usize,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, ip: usize) -> Self {
        RuntimeError {
            message: message.into(),
            ip,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at instruction {})", self.message, self.ip)
    }
}

impl std::error::Error for RuntimeError {}
