//! Whole-machine state capture.
//!
//! A load is all or nothing: the model, the memory image and every device
//! payload are checked and decoded first, and only then is anything
//! replaced. Devices rebuild their page mappings from their restored state
//! in chain order, so downstream overrides land on top of upstream ones.

use emu_core::{MemoryImage, VideoCounters};
use serde::{Deserialize, Serialize};
use zilog_z80::Registers;

use crate::config::SpectrumModel;
use crate::error::SnapshotError;
use crate::spectrum::Spectrum;

/// One device's saved payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub name: String,
    pub state: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineState {
    pub model: SpectrumModel,
    pub registers: Registers,
    /// Frame cycle counter.
    pub cycle: i32,
    /// End of the INT window, in frame cycles.
    pub int_until: i32,
    pub instructions: u64,
    pub memory: MemoryImage,
    /// Device payloads in chain order.
    pub devices: Vec<DeviceState>,
    /// Video frame bookkeeping, including the FLASH phase.
    #[serde(default)]
    pub video: VideoCounters,
    /// Frames the machine has run.
    #[serde(default)]
    pub frames: u64,
}

impl MachineState {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Spectrum {
    #[must_use]
    pub fn save_state(&self) -> MachineState {
        MachineState {
            model: self.config.model,
            registers: *self.cpu.registers(),
            cycle: self.cpu.cc(),
            int_until: self.cpu.int_until(),
            instructions: self.cpu.instructions(),
            memory: self.bus.memory.image(),
            devices: self.bus.chain.save_states(),
            video: self.bus.video.counters(),
            frames: self.frames,
        }
    }

    /// Replace the machine state. Any recording or playback ends.
    ///
    /// On error nothing has changed.
    pub fn load_state(&mut self, state: &MachineState) -> Result<(), SnapshotError> {
        self.restore(state)?;
        self.bus.replay.go_live();
        Ok(())
    }

    pub(crate) fn restore(&mut self, state: &MachineState) -> Result<(), SnapshotError> {
        if state.model != self.config.model {
            return Err(SnapshotError::Model {
                expected: self.config.model.name().to_string(),
                found: state.model.name().to_string(),
            });
        }
        if let Err(e) = self.bus.memory.check_image(&state.memory) {
            log::warn!("snapshot: {e}");
            return Err(e.into());
        }
        let staged = self.bus.chain.stage_states(&state.devices).inspect_err(|e| {
            log::warn!("snapshot: {e}");
        })?;

        self.bus.memory.restore_image(&state.memory)?;
        self.cpu.set_registers(state.registers);
        self.cpu.set_cc(state.cycle);
        self.cpu.assert_int(state.int_until);
        self.cpu.set_instructions(state.instructions);
        self.bus.audio_start = state.cycle;
        self.bus.video.set_counters(state.video);
        self.frames = state.frames;
        self.bus
            .chain
            .apply_states(&mut self.bus.memory, state.cycle, staged);
        log::info!(
            "snapshot: loaded at cycle {}, {} instructions",
            state.cycle,
            state.instructions
        );
        Ok(())
    }
}
