//! Compilation errors

use thiserror::Error;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    /// Parse error from oxc
    #[error("Parse error: {0}")]
    Parse(String),

    /// Source uses a construct this engine does not compile
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Register pressure exceeded the register file's width limit
    #[error("Too many registers (max 65534)")]
    TooManyRegisters,

    /// AST nesting exceeded the compiler's depth guard
    #[error("Maximum nesting depth exceeded")]
    NestingTooDeep,

    /// Internal compiler error; always a bug
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CompileError {
    /// Create an unsupported-construct error
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported(feature.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
