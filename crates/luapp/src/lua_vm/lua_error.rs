// Error types surfaced by the compiler and the VM.

use std::fmt;

/// Failure of a compile or run. Compile errors have already been rendered by
/// the diagnostic context; runtime errors have already printed their stack
/// trace. The payload is the summary message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LuaError {
    Compile(String),
    Runtime(String),
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaError::Compile(msg) => write!(f, "compile error: {msg}"),
            LuaError::Runtime(msg) => write!(f, "runtime error: {msg}"),
        }
    }
}

impl std::error::Error for LuaError {}

pub type LuaResult<T> = Result<T, LuaError>;

/// Three-way outcome reported to the CLI front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

impl From<&LuaError> for InterpretResult {
    fn from(err: &LuaError) -> Self {
        match err {
            LuaError::Compile(_) => InterpretResult::CompileError,
            LuaError::Runtime(_) => InterpretResult::RuntimeError,
        }
    }
}
