//! # Ferret Snapshot
//!
//! The bytecode snapshot codec: serializes a fully compiled program — the
//! code-block tree, each block's bytecode stream, its referenced literal
//! strings and its static scope metadata — into one self-contained binary
//! artifact, and reconstitutes an equivalent program in a fresh context
//! without re-parsing the source.
//!
//! Live bytecode operands carry process-local handles (string atoms,
//! code-block ids) and absolute jump positions. The codec rewrites every
//! such slot to a small table index (or buffer-relative offset) on save and
//! back on load, driven by the single declarative operand table in
//! `ferret-vm-bytecode`. The saver always works on a private copy of each
//! bytecode buffer; a context that has been saved keeps running untouched.

#![warn(clippy::all)]
#![warn(missing_docs)]

mod block_index;
mod error;
mod interner;
mod loader;
mod saver;
mod wire;

pub use error::SnapshotError;
pub use loader::{execute, load, LoadedScript};
pub use saver::{generate, generate_from_root, generate_from_script, generate_to_file};
pub use wire::{
    EMPTY_NAME_SENTINEL, SNAPSHOT_FILENAME, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};
