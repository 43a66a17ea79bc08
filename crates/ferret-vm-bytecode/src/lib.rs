//! # Ferret VM Bytecode
//!
//! This crate defines the bytecode format for the Ferret JavaScript engine.
//!
//! ## Design Principles
//!
//! - **Register-based**: operations work on virtual registers backed by a
//!   per-call register file
//! - **Byte stream**: a code block's bytecode is a flat byte buffer of
//!   fixed-size records; the size of a record is a pure function of its
//!   opcode
//! - **Declarative operand table**: every opcode declares its operand kinds
//!   exactly once; stream walking, length computation and the snapshot
//!   codec's operand rewriting all derive from that single table

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod block;
pub mod error;
pub mod literal;
pub mod opcode;
pub mod operand;
pub mod stream;

pub use block::{ByteCodeBlock, InlineCache};
pub use error::BytecodeError;
pub use literal::Literal;
pub use opcode::{Opcode, OperandKind, OPCODE_WORD_SIZE};
pub use operand::{Atom, BlockId, Register};
pub use stream::{ByteCodeWriter, InstructionWalker, OperandCursor};
