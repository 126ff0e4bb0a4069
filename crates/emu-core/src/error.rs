//! Errors raised by the memory model.

use thiserror::Error;

/// A memory image does not fit the live block layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryImageError {
    #[error("memory image has {found} blocks, machine has {expected}")]
    BlockCount { expected: usize, found: usize },

    #[error("memory image block {found:?} found where {expected:?} was expected")]
    BlockName { expected: String, found: String },

    #[error("memory image block {name:?} is {found} bytes, expected {expected}")]
    BlockSize {
        name: String,
        expected: usize,
        found: usize,
    },
}
