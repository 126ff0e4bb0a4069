//! Top-level Spectrum system.
//!
//! A machine is a Z80, the system bus (memory, peripheral chain, ULA timing
//! and replay) and the configuration it was built from. The chain always
//! starts with the model's memory controller, the ULA port and the beeper;
//! optional devices follow in configuration order.
//!
//! # Frame loop
//!
//! Everything counts in CPU T-states within the current frame. At each
//! flyback the counters move back by one frame length, so they stay small
//! however long a session runs. See `scheduler` for the run loop.

use emu_core::{MasterClock, Memory, Observable, Value, VideoTiming};
use sinclair_ula::UlaTiming;
use zilog_z80::Z80;

use crate::beeper::Beeper;
use crate::bus::SpectrumBus;
use crate::chain::{Peripheral, PeripheralChain};
use crate::config::{PeripheralKind, SpectrumConfig, SpectrumModel};
use crate::error::{ConfigError, ReplayError, TapError};
use crate::kempston::{Kempston, KempstonButtons};
use crate::keyboard::SpectrumKey;
use crate::memory::{MemoryController48K, MemoryController128K};
use crate::replay::{ReplayState, ReplayStream};
use crate::shadow_rom::ShadowRom;
use crate::tap::TapFile;
use crate::tape::TapeDeck;
use crate::ula::UlaPort;

/// ZX Spectrum system.
pub struct Spectrum {
    pub(crate) config: SpectrumConfig,
    pub(crate) cpu: Z80,
    pub(crate) bus: SpectrumBus,
    /// Completed frames since power-on.
    pub(crate) frames: u64,
}

impl Spectrum {
    /// Build and power on a machine.
    pub fn new(config: SpectrumConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let model = config.model;
        let ula = UlaTiming::new(model.ula());
        let clock = MasterClock::new(model.ula().cpu_frequency());

        let mut memory = Memory::new();
        let wait = memory.add_wait_table(ula.wait_table());
        let controller: Box<dyn Peripheral> = match model {
            SpectrumModel::Spectrum48K => {
                Box::new(MemoryController48K::new(&mut memory, &config.rom, wait))
            }
            SpectrumModel::Spectrum128K => {
                Box::new(MemoryController128K::new(&mut memory, &config.rom, wait))
            }
        };
        let mut chain = PeripheralChain::new(controller);
        chain.attach(Box::new(UlaPort::new()));
        chain.attach(Box::new(Beeper::new(config.audio_sample_rate)));
        for kind in &config.peripherals {
            let device: Box<dyn Peripheral> = match kind {
                PeripheralKind::Kempston => Box::new(Kempston::new()),
                PeripheralKind::TapeDeck => Box::new(TapeDeck::new()),
                PeripheralKind::ShadowRom => Box::new(ShadowRom::new(&mut memory, &config.shadow_rom)),
            };
            chain.attach(device);
        }

        log::info!(
            "spectrum: {} with {} devices",
            model.name(),
            chain.len()
        );
        let mut spectrum = Self {
            bus: SpectrumBus::new(memory, chain, Box::new(ula), clock),
            config,
            cpu: Z80::new(),
            frames: 0,
        };
        spectrum.power_on();
        Ok(spectrum)
    }

    fn power_on(&mut self) {
        self.bus.chain.power_on(&mut self.bus.memory, 0);
        self.cpu.assert_int(self.bus.video.int_length());
    }

    /// Press the reset button: the CPU restarts at `$0000` and every device
    /// gets its reset hook. Counters keep running.
    pub fn reset(&mut self) {
        log::info!("spectrum: reset");
        let cc = self.cpu.cc();
        let time = self.bus.block_time(cc);
        self.cpu.reset();
        self.bus.chain.reset(&mut self.bus.memory, cc, time);
    }

    #[must_use]
    pub fn config(&self) -> &SpectrumConfig {
        &self.config
    }

    #[must_use]
    pub fn model(&self) -> SpectrumModel {
        self.config.model
    }

    #[must_use]
    pub fn cpu(&self) -> &Z80 {
        &self.cpu
    }

    /// Direct CPU access for debuggers and tests. Only safe between runs.
    pub fn cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    #[must_use]
    pub fn bus(&self) -> &SpectrumBus {
        &self.bus
    }

    #[must_use]
    pub fn memory(&self) -> &Memory {
        &self.bus.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.bus.memory
    }

    #[must_use]
    pub fn chain(&self) -> &PeripheralChain {
        &self.bus.chain
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    #[must_use]
    pub fn cycles_per_frame(&self) -> i32 {
        self.bus.video.cycles_per_frame()
    }

    #[must_use]
    pub fn peripheral<T: Peripheral + 'static>(&self) -> Option<&T> {
        self.bus.chain.get::<T>()
    }

    pub fn peripheral_mut<T: Peripheral + 'static>(&mut self) -> Option<&mut T> {
        self.bus.chain.get_mut::<T>()
    }

    /// Attach a device at the end of the chain and power it on.
    pub fn attach(&mut self, device: Box<dyn Peripheral>) {
        let index = self.bus.chain.attach(device);
        self.bus
            .chain
            .power_on_link(index, &mut self.bus.memory, self.cpu.cc());
    }

    /// Remove the named device after it releases its overrides.
    pub fn detach(&mut self, name: &str) -> Option<Box<dyn Peripheral>> {
        self.bus
            .chain
            .detach(&mut self.bus.memory, self.cpu.cc(), name)
    }

    // =========================================================================
    // Input
    // =========================================================================

    pub fn set_key(&mut self, key: SpectrumKey, pressed: bool) {
        if let Some(ula) = self.bus.chain.get_mut::<UlaPort>() {
            ula.set_key(key, pressed);
        }
    }

    pub fn release_all_keys(&mut self) {
        if let Some(ula) = self.bus.chain.get_mut::<UlaPort>() {
            ula.keyboard_mut().release_all();
        }
    }

    /// No effect without a Kempston interface attached.
    pub fn set_joystick(&mut self, buttons: KempstonButtons, pressed: bool) {
        if let Some(joy) = self.bus.chain.get_mut::<Kempston>() {
            joy.set(buttons, pressed);
        }
    }

    // =========================================================================
    // Tape
    // =========================================================================

    /// Parse a TAP byte stream into the tape deck. Returns `Ok(false)` when
    /// no deck is attached.
    pub fn insert_tap(&mut self, bytes: &[u8]) -> Result<bool, TapError> {
        let tape = TapFile::parse(bytes)?;
        Ok(self.insert_tape(tape))
    }

    pub fn insert_tape(&mut self, tape: TapFile) -> bool {
        match self.bus.chain.get_mut::<TapeDeck>() {
            Some(deck) => {
                deck.insert(tape);
                true
            }
            None => false,
        }
    }

    pub fn play_tape(&mut self) {
        let cc = self.cpu.cc();
        if let Some(deck) = self.bus.chain.get_mut::<TapeDeck>() {
            deck.play(cc);
        }
    }

    pub fn stop_tape(&mut self) {
        if let Some(deck) = self.bus.chain.get_mut::<TapeDeck>() {
            deck.stop();
        }
    }

    // =========================================================================
    // Audio
    // =========================================================================

    /// Beeper samples rendered by completed audio blocks.
    pub fn take_audio_samples(&mut self) -> Vec<f32> {
        self.bus
            .chain
            .get_mut::<Beeper>()
            .map(Beeper::take_samples)
            .unwrap_or_default()
    }

    // =========================================================================
    // Replay
    // =========================================================================

    #[must_use]
    pub fn replay_state(&self) -> &ReplayState {
        self.bus.replay.state()
    }

    /// Start recording from the current state, which becomes frame 0's
    /// snapshot.
    pub fn start_recording(&mut self) -> Result<(), ReplayError> {
        self.bus.replay.check_can_record()?;
        let snapshot = self.save_state();
        self.bus
            .replay
            .begin_recording(self.cpu.instructions(), snapshot);
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<ReplayStream, ReplayError> {
        self.bus
            .replay
            .end_recording(self.cpu.instructions(), self.cpu.cc())
    }

    pub fn start_playback(&mut self, stream: ReplayStream) -> Result<(), ReplayError> {
        self.start_playback_at(stream, 0)
    }

    /// Load the snapshot of `frame` and play from there. On error the
    /// machine is unchanged.
    pub fn start_playback_at(&mut self, stream: ReplayStream, frame: usize) -> Result<(), ReplayError> {
        let snapshot = self.bus.replay.check_playback(&stream, frame)?.clone();
        self.restore(&snapshot)?;
        self.bus
            .replay
            .begin_playback(stream, frame, self.cpu.instructions());
        Ok(())
    }

    /// Leave playback, a finished stream or a desync and take live input.
    pub fn go_live(&mut self) {
        self.bus.replay.go_live();
    }
}

fn parse_addr(text: &str) -> Option<u16> {
    if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .or_else(|| text.strip_prefix('$'))
    {
        u16::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

impl Observable for Spectrum {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("cpu.") {
            self.cpu.query(rest)
        } else if let Some(rest) = path.strip_prefix("ula.") {
            self.bus.video.query(rest)
        } else if let Some(rest) = path.strip_prefix("memory.") {
            parse_addr(rest).map(|addr| Value::U8(self.bus.memory.peek(addr)))
        } else {
            match path {
                "model" => Some(self.config.model.name().into()),
                "frame" => Some(self.frames.into()),
                "cycle" => Some(self.cpu.cc().into()),
                "instructions" => Some(self.cpu.instructions().into()),
                "replay" => Some(self.bus.replay.state().to_string().into()),
                "chain" => Some(Value::Array(
                    self.bus.chain.names().map(Value::from).collect(),
                )),
                _ => None,
            }
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "model",
            "frame",
            "cycle",
            "instructions",
            "replay",
            "chain",
            "cpu.pc",
            "cpu.sp",
            "cpu.af",
            "cpu.bc",
            "cpu.de",
            "cpu.hl",
            "cpu.ix",
            "cpu.iy",
            "ula.frames",
            "ula.flash",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_hex_addresses() {
        assert_eq!(parse_addr("16384"), Some(0x4000));
        assert_eq!(parse_addr("0x4000"), Some(0x4000));
        assert_eq!(parse_addr("$5C00"), Some(0x5C00));
        assert_eq!(parse_addr("zz"), None);
    }
}
