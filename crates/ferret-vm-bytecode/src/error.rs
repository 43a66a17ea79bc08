//! Bytecode errors

use thiserror::Error;

/// Errors that can occur while decoding a bytecode stream
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Opcode word does not name a known opcode
    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u32),

    /// A record extends past the end of the stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// An engine value carries an unknown tag
    #[error("Invalid literal value tag: {0}")]
    InvalidLiteralTag(u64),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
