//! Recoverable failures. Misconfiguration of pages and ports panics instead.

use emu_core::MemoryImageError;
use thiserror::Error;

/// A saved machine state does not fit this machine.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is for model {found}, machine is {expected}")]
    Model { expected: String, found: String },
    #[error("memory image: {0}")]
    Memory(#[from] MemoryImageError),
    #[error("snapshot has {found} devices, machine has {expected}")]
    DeviceCount { expected: usize, found: usize },
    #[error("device {index} is {found}, expected {expected}")]
    DeviceName {
        index: usize,
        expected: String,
        found: String,
    },
    #[error("device {name}: {cause}")]
    DeviceState { name: String, cause: String },
}

/// A replay stream cannot be used.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay stream does not parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported replay stream version {0}")]
    Version(u32),
    #[error("replay frame {0} has no snapshot to start from")]
    NoSnapshot(usize),
    #[error("replay stream has no frame {0}")]
    NoFrame(usize),
    #[error("replay frame {frame}: {reason}")]
    Frame { frame: usize, reason: &'static str },
    #[error("cannot {action} while {state}")]
    State { action: &'static str, state: String },
    #[error("replay start snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Machine configuration is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration does not parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{model} needs a {expected}-byte ROM, got {found} bytes")]
    RomSize {
        model: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("shadow ROM must be {expected} bytes, got {found}")]
    ShadowRomSize { expected: usize, found: usize },
}

/// A TAP byte stream is malformed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TapError {
    #[error("truncated length word at offset {offset}")]
    TruncatedLength { offset: usize },
    #[error("block at offset {offset} has length {len}; at least 2 needed")]
    ShortBlock { offset: usize, len: usize },
    #[error("block at offset {offset} needs {len} bytes, only {remaining} remain")]
    TruncatedBlock {
        offset: usize,
        len: usize,
        remaining: usize,
    },
    #[error("block at offset {offset}: checksum ${found:02X}, expected ${expected:02X}")]
    Checksum {
        offset: usize,
        expected: u8,
        found: u8,
    },
}
