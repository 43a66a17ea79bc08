//! Runtime errors

use thiserror::Error;

use crate::value::Value;

/// Errors raised while executing bytecode
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Type error (calling a non-function, property access on a primitive)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Reference error (unresolvable identifier)
    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    /// Call-stack depth limit reached
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    /// A JavaScript `throw`
    #[error("Uncaught exception: {message}")]
    Thrown {
        /// The thrown value
        value: Value,
        /// String rendering of the thrown value, for diagnostics
        message: String,
    },

    /// Invariant violation inside the interpreter; always a bug
    #[error("InternalError: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Can a `catch` clause observe this error?
    ///
    /// Stack exhaustion and interpreter bugs unwind the whole execution.
    pub fn is_catchable(&self) -> bool {
        !matches!(self, Self::StackOverflow | Self::Internal(_))
    }
}
