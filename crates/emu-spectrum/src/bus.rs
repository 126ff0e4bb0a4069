//! The system bus the CPU runs against.
//!
//! Every port access pays its I/O contention through the video timing
//! model, is resolved by the peripheral chain, falls back to the floating
//! bus for bits no device drove and finally passes the replay, which may
//! record it or replace it.

use std::collections::VecDeque;

use emu_core::{MasterClock, Memory, Observable, VideoTiming};
use zilog_z80::{AccessKind, Registers, Z80Bus};

use crate::chain::PeripheralChain;
use crate::replay::Replay;

/// Video timing model as the machine holds it.
pub trait VideoModel: VideoTiming + Observable + Send {}

impl<T: VideoTiming + Observable + Send> VideoModel for T {}

/// One logged access to a `LOG_ACCESS` cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRecord {
    pub cycle: i32,
    pub addr: u16,
    pub kind: AccessKind,
    pub value: u8,
}

/// Entries kept before the oldest are dropped.
const ACCESS_LOG_LIMIT: usize = 4096;

pub struct SpectrumBus {
    pub memory: Memory,
    pub chain: PeripheralChain,
    pub video: Box<dyn VideoModel>,
    pub replay: Replay,
    clock: MasterClock,
    /// Frame cycle at which the current audio block started.
    pub(crate) audio_start: i32,
    access_log: VecDeque<AccessRecord>,
}

impl SpectrumBus {
    #[must_use]
    pub fn new(
        memory: Memory,
        chain: PeripheralChain,
        video: Box<dyn VideoModel>,
        clock: MasterClock,
    ) -> Self {
        Self {
            memory,
            chain,
            video,
            replay: Replay::new(),
            clock,
            audio_start: 0,
            access_log: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn clock(&self) -> MasterClock {
        self.clock
    }

    /// Seconds since the current audio block started.
    #[must_use]
    pub fn block_time(&self, cc: i32) -> f64 {
        self.clock.seconds(i64::from(cc - self.audio_start))
    }

    pub fn take_access_log(&mut self) -> Vec<AccessRecord> {
        self.access_log.drain(..).collect()
    }
}

impl Z80Bus for SpectrumBus {
    fn memory(&self) -> &Memory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    fn input(&mut self, cc: i32, port: u16) -> (u8, i32) {
        let high_contended = self.memory.is_contended(port);
        let end = self.video.add_wait_cycles(cc, port, high_contended);
        let time = self.block_time(cc);
        let read = self.chain.input(&mut self.memory, cc, time, port);
        let screen = self.chain.screen();
        let byte = read.resolve(self.video.floating_bus_byte(cc, &self.memory, screen));
        (self.replay.on_input(cc, byte), end)
    }

    fn output(&mut self, cc: i32, port: u16, value: u8) -> i32 {
        let high_contended = self.memory.is_contended(port);
        let end = self.video.add_wait_cycles(cc, port, high_contended);
        let time = self.block_time(cc);
        self.chain.output(&mut self.memory, cc, time, port, value);
        end
    }

    fn patch_opcode(&mut self, cc: i32, regs: &mut Registers, pc: u16, opcode: u8) -> u8 {
        self.chain.patch_opcode(&mut self.memory, cc, regs, pc, opcode)
    }

    fn mmio_read(&mut self, cc: i32, addr: u16) -> u8 {
        match self.chain.mmio_read(&mut self.memory, cc, addr) {
            Some(value) => value,
            None => self.memory.peek(addr),
        }
    }

    fn mmio_write(&mut self, cc: i32, addr: u16, value: u8) {
        if !self.chain.mmio_write(&mut self.memory, cc, addr, value) {
            log::trace!("bus: unclaimed mmio write ${value:02X} to ${addr:04X}");
        }
    }

    fn video_flush(&mut self, cc: i32, addr: u16) {
        self.video.flush(cc, addr);
    }

    fn log_access(&mut self, cc: i32, addr: u16, kind: AccessKind, value: u8) {
        log::trace!(
            target: "emu_spectrum::access",
            "{cc}: {kind:?} ${addr:04X} = ${value:02X}"
        );
        if self.access_log.len() == ACCESS_LOG_LIMIT {
            self.access_log.pop_front();
        }
        self.access_log.push_back(AccessRecord {
            cycle: cc,
            addr,
            kind,
            value,
        });
    }

    fn stop_requested(&self) -> bool {
        self.replay.is_halted()
    }
}
