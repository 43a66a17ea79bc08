//! Snapshot error taxonomy

use thiserror::Error;

/// Errors of the snapshot codec
///
/// Format errors describe a snapshot artifact the loader refuses;
/// integrity errors are save-side invariant violations (bugs in the
/// producer); compile and runtime errors pass through from the engine.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The artifact does not start with the snapshot magic
    #[error("wrong file format: bad magic 0x{0:08x}")]
    BadMagic(u32),

    /// The artifact has an unsupported version
    #[error("wrong snapshot version {0}")]
    BadVersion(u32),

    /// A region of the artifact extends past the end of the input
    #[error("truncated snapshot while reading {region}")]
    Truncated {
        /// The region being read when the input ran out
        region: &'static str,
    },

    /// The artifact is structurally malformed
    #[error("malformed snapshot: {0}")]
    Format(String),

    /// A save-side invariant was violated; a bug in the saver or in the
    /// compiled program handed to it
    #[error("snapshot integrity violation: {0}")]
    Integrity(String),

    /// Snapshot file could not be written or read
    #[error("snapshot i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine rejected the source during a save
    #[error(transparent)]
    Compile(#[from] ferret_vm_compiler::CompileError),

    /// The engine raised an exception while executing a loaded snapshot
    #[error(transparent)]
    Runtime(#[from] ferret_vm_core::RuntimeError),
}

impl SnapshotError {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub(crate) fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }
}
