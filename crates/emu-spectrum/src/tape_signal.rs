//! Real-time EAR signal for standard-speed tape blocks.
//!
//! The generator is a small state machine plus a cursor into the current
//! pulse. `advance` consumes any number of cycles and stops mid-pulse when
//! they run out; the next call picks up exactly there.
//!
//! Each block is a pilot tone, two sync pulses, then two equal pulses per
//! bit (most significant first), followed by a one-second pause.

use serde::{Deserialize, Serialize};

use crate::tap::TapBlock;

/// Pulse lengths in T-states at 3.5 MHz.
pub const PILOT_PULSE: u32 = 2168;
pub const SYNC1_PULSE: u32 = 667;
pub const SYNC2_PULSE: u32 = 735;
pub const ZERO_PULSE: u32 = 855;
pub const ONE_PULSE: u32 = 1710;

/// Pilot pulses before a header block and before a data block.
pub const HEADER_PILOT_PULSES: u32 = 8063;
pub const DATA_PILOT_PULSES: u32 = 3223;

/// Silence after each block.
pub const PAUSE_CYCLES: u32 = 3_500_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalState {
    Pilot { pulses_left: u32 },
    Sync1,
    Sync2,
    /// Bit `bit` (0 = MSB) of byte `byte`; `second` for its second pulse.
    Data { byte: usize, bit: u8, second: bool },
    Pause,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeSignal {
    /// Tape bytes (flag, data, checksum) of every block.
    blocks: Vec<Vec<u8>>,
    block: usize,
    state: SignalState,
    /// Cycles left in the current pulse.
    remaining: u32,
    level: bool,
}

impl TapeSignal {
    /// Signal for `blocks`, starting at the pilot of block `first`.
    #[must_use]
    pub fn new(blocks: &[TapBlock], first: usize) -> Self {
        let mut signal = Self {
            blocks: blocks.iter().map(TapBlock::tape_bytes).collect(),
            block: first,
            state: SignalState::Stopped,
            remaining: 0,
            level: false,
        };
        signal.start_block(first);
        signal
    }

    #[must_use]
    pub fn level(&self) -> bool {
        self.level
    }

    #[must_use]
    pub fn state(&self) -> SignalState {
        self.state
    }

    /// Block currently playing.
    #[must_use]
    pub fn block(&self) -> usize {
        self.block
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state == SignalState::Stopped
    }

    /// Let `cycles` T-states of tape go by.
    pub fn advance(&mut self, mut cycles: u32) {
        while self.state != SignalState::Stopped {
            if cycles < self.remaining {
                self.remaining -= cycles;
                return;
            }
            cycles -= self.remaining;
            self.end_pulse();
        }
    }

    fn start_block(&mut self, block: usize) {
        self.block = block;
        let Some(bytes) = self.blocks.get(block) else {
            log::debug!("tape: end of tape");
            self.state = SignalState::Stopped;
            return;
        };
        let pulses_left = if bytes.first().is_some_and(|&flag| flag < 0x80) {
            HEADER_PILOT_PULSES
        } else {
            DATA_PILOT_PULSES
        };
        log::debug!("tape: block {block} pilot ({pulses_left} pulses)");
        self.state = SignalState::Pilot { pulses_left };
        self.remaining = PILOT_PULSE;
    }

    fn bit_pulse(&self, byte: usize, bit: u8) -> u32 {
        if self.blocks[self.block][byte] & (0x80 >> bit) != 0 {
            ONE_PULSE
        } else {
            ZERO_PULSE
        }
    }

    fn end_pulse(&mut self) {
        if self.state == SignalState::Pause {
            self.start_block(self.block + 1);
            return;
        }
        self.level = !self.level;
        match self.state {
            SignalState::Pilot { pulses_left } if pulses_left > 1 => {
                self.state = SignalState::Pilot {
                    pulses_left: pulses_left - 1,
                };
                self.remaining = PILOT_PULSE;
            }
            SignalState::Pilot { .. } => {
                self.state = SignalState::Sync1;
                self.remaining = SYNC1_PULSE;
            }
            SignalState::Sync1 => {
                self.state = SignalState::Sync2;
                self.remaining = SYNC2_PULSE;
            }
            SignalState::Sync2 => {
                self.state = SignalState::Data {
                    byte: 0,
                    bit: 0,
                    second: false,
                };
                self.remaining = self.bit_pulse(0, 0);
            }
            SignalState::Data {
                byte,
                bit,
                second: false,
            } => {
                self.state = SignalState::Data {
                    byte,
                    bit,
                    second: true,
                };
                self.remaining = self.bit_pulse(byte, bit);
            }
            SignalState::Data { byte, bit, .. } => {
                let (byte, bit) = if bit == 7 { (byte + 1, 0) } else { (byte, bit + 1) };
                if byte == self.blocks[self.block].len() {
                    self.state = SignalState::Pause;
                    self.remaining = PAUSE_CYCLES;
                } else {
                    self.state = SignalState::Data {
                        byte,
                        bit,
                        second: false,
                    };
                    self.remaining = self.bit_pulse(byte, bit);
                }
            }
            SignalState::Pause | SignalState::Stopped => {}
        }
    }
}
