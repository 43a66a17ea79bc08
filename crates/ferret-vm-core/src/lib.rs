//! # Ferret VM Core
//!
//! Core runtime types for the Ferret JavaScript engine: the interned-string
//! table, runtime values and objects, code blocks with their scope metadata,
//! and the engine context that owns all of them.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod atom;
pub mod code_block;
pub mod context;
pub mod error;
pub mod object;
pub mod value;

pub use atom::AtomTable;
pub use code_block::{
    CodeBlock, CodeBlockFlags, IdentifierDeclaration, ParameterDeclaration,
};
pub use context::Context;
pub use error::RuntimeError;
pub use object::{FunctionData, HeapEnv, JsObject, NativeFunction, ObjectKind, ObjectRef};
pub use value::Value;
