//! Cycle-accurate ZX Spectrum machine.
//!
//! The Z80 runs against a `SpectrumBus`: memory built from cells and a page
//! table, a daisy chain of peripherals answering port accesses and paging
//! requests, and the ULA timing model. The scheduler drives the CPU through
//! each frame in regions, handles flyback and audio blocks, and cooperates
//! with the replay recorder/player. Snapshots capture the whole machine and
//! load all or nothing.
//!
//! 48K and 128K models are supported; optional Kempston, tape deck and
//! shadow-ROM devices attach through the configuration.

mod beeper;
mod bus;
mod chain;
mod config;
mod debugger;
mod error;
mod kempston;
mod keyboard;
mod memory;
mod registry;
mod replay;
mod scheduler;
mod shadow_rom;
mod snapshot;
mod spectrum;
pub mod tap;
mod tape;
mod tape_signal;
mod ula;

pub use beeper::Beeper;
pub use bus::{AccessRecord, SpectrumBus, VideoModel};
pub use chain::{BusCtx, Peripheral, PeripheralChain, PortMatch, PortRead, decode_state};
pub use config::{PeripheralKind, SpectrumConfig, SpectrumModel};
pub use debugger::BreakKind;
pub use error::{ConfigError, ReplayError, SnapshotError, TapError};
pub use kempston::{Kempston, KempstonButtons};
pub use keyboard::{KeyboardState, SpectrumKey};
pub use memory::{BANK_SIZE, MemoryController128K, MemoryController48K};
pub use registry::{MachineId, MachineRegistry, SharedMachine};
pub use replay::{
    InputSample, OutOfSync, REPLAY_CYCLE_SLACK, REPLAY_VERSION, Replay, ReplayFrame, ReplayState,
    ReplayStream,
};
pub use scheduler::{CONTENDED_MODE, Region, RunOutcome, UNCONTENDED_MODE, region_at};
pub use shadow_rom::{PAGE_IN, PAGE_OUT, SHADOW_ROM_SIZE, ShadowRom};
pub use snapshot::{DeviceState, MachineState};
pub use spectrum::Spectrum;
pub use tap::{TapBlock, TapFile};
pub use tape::{LD_BYTES, TapeDeck};
pub use tape_signal::{SignalState, TapeSignal};
pub use ula::{ULA_PORTS, UlaPort};
