//! # Ferret VM Exec
//!
//! The bytecode interpreter: a match loop over the byte stream with a
//! register-file frame per call. Frames are laid out as the compiler
//! expects: temporaries, the `this` slot, stack-resident identifiers, then
//! the block's numeral literals preloaded at the tail.

#![warn(clippy::all)]
#![warn(missing_docs)]

mod interpreter;

pub use interpreter::execute_program;
