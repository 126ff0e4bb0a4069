//! Port `$FE`: keyboard, EAR/MIC and border.
//!
//! The ULA answers every even port. Reads return the keyboard half-rows
//! selected by the high address byte in bits 0-4 and the EAR level in bit
//! 6; bits 5 and 7 are always set. Writes set the border colour (bits 0-2),
//! MIC (bit 3) and the speaker (bit 4, handled by the beeper link).

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::chain::{BusCtx, Peripheral, PortMatch, PortRead, decode_state};
use crate::keyboard::{KeyboardState, SpectrumKey};

/// Even ports.
pub const ULA_PORTS: PortMatch = PortMatch::new(0x0001, 0x0000);

/// The ULA's port `$FE` decoder.
#[derive(Debug, Default)]
pub struct UlaPort {
    keyboard: KeyboardState,
    /// Last byte written to `$FE`.
    last_write: u8,
    /// Border colour changes this frame: (cycle, colour).
    border_changes: Vec<(i32, u8)>,
}

#[derive(Serialize, Deserialize)]
struct UlaPortState {
    keyboard: KeyboardState,
    last_write: u8,
}

impl UlaPort {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key(&mut self, key: SpectrumKey, pressed: bool) {
        self.keyboard.set(key, pressed);
    }

    #[must_use]
    pub fn keyboard(&self) -> &KeyboardState {
        &self.keyboard
    }

    pub fn keyboard_mut(&mut self) -> &mut KeyboardState {
        &mut self.keyboard
    }

    #[must_use]
    pub fn border(&self) -> u8 {
        self.last_write & 0x07
    }

    /// Border changes since the last frame end, for a renderer.
    #[must_use]
    pub fn border_changes(&self) -> &[(i32, u8)] {
        &self.border_changes
    }
}

impl Peripheral for UlaPort {
    fn name(&self) -> &'static str {
        "ula"
    }

    fn in_match(&self) -> Option<PortMatch> {
        Some(ULA_PORTS)
    }

    fn out_match(&self) -> Option<PortMatch> {
        Some(ULA_PORTS)
    }

    fn input(&mut self, _ctx: &mut BusCtx<'_>, port: u16) -> PortRead {
        let keys = self.keyboard.read((port >> 8) as u8);
        // MIC loops back to EAR only while nothing else drives the line.
        let ear = (self.last_write & 0x08) << 3;
        PortRead::bits(keys | 0xA0, 0xBF).hold(ear, 0x40)
    }

    fn output(&mut self, ctx: &mut BusCtx<'_>, _port: u16, value: u8) {
        if (value ^ self.last_write) & 0x07 != 0 {
            self.border_changes.push((ctx.cc, value & 0x07));
        }
        self.last_write = value;
    }

    fn power_on(&mut self, _ctx: &mut BusCtx<'_>) {
        self.last_write = 0;
        self.border_changes.clear();
    }

    fn frame_end(&mut self, _cc: i32, _frame_cycles: i32) {
        self.border_changes.clear();
    }

    fn save_state(&self) -> serde_json::Value {
        serde_json::json!(UlaPortState {
            keyboard: self.keyboard.clone(),
            last_write: self.last_write,
        })
    }

    fn decode_state(&self, state: &serde_json::Value) -> Result<Box<dyn Any>, serde_json::Error> {
        decode_state::<UlaPortState>(state)
    }

    fn apply_state(&mut self, _ctx: &mut BusCtx<'_>, state: Box<dyn Any>) {
        if let Ok(state) = state.downcast::<UlaPortState>() {
            self.keyboard = state.keyboard;
            self.last_write = state.last_write;
            self.border_changes.clear();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
