//! Contract between the machine core and its video/audio timing model.
//!
//! The core knows nothing about scanlines or contention patterns; it asks
//! the collaborator. Every model variant plugs its reverse-engineered
//! constants in here.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::memory::{Memory, Source};

/// Longest Z80 instruction, in T-states. Regions that must observe wait
/// states start this far ahead of the first contended cycle.
pub const MAX_INSTRUCTION_CYCLES: i32 = 23;

/// Frame bookkeeping a video model carries across snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoCounters {
    /// Frames completed since power-on.
    pub frames: u64,
    /// Seconds of audio accounted through completed audio blocks.
    pub audio_time: f64,
    /// Cycle the display has been brought up to in the current frame.
    pub drawn_until: i32,
    /// Display flushes requested in the current frame.
    pub flushes: u32,
}

/// Video timing, contention and frame bookkeeping for one machine model.
pub trait VideoTiming {
    /// Cycles in one complete frame.
    fn cycles_per_frame(&self) -> i32;

    /// Cycles in one scanline. Wait tables are indexed modulo this length.
    fn cycles_per_line(&self) -> i32;

    /// Cycles within a frame during which contended accesses can be delayed.
    /// Outside this range, wait-state checks are never needed.
    fn contended_window(&self) -> Range<i32>;

    /// Cycles the maskable interrupt line stays asserted after flyback.
    fn int_length(&self) -> i32;

    /// Per-line wait table for contended memory: entry `i` is the delay for
    /// an access starting at a cycle congruent to `i` modulo the line length.
    fn wait_table(&self) -> Vec<u8>;

    /// End of frame reached at cycle `cc`. Returns the frame length, which the
    /// caller subtracts from its counters.
    fn frame_flyback(&mut self, cc: i32) -> i32;

    /// An audio block of `time` seconds has ended.
    fn audio_block_end(&mut self, time: f64);

    /// The byte the video controller is fetching at `cc`, or `$FF` when idle.
    /// `screen` is the storage the display reads, at its first byte.
    /// `Source::Unmapped` means the CPU's view of memory.
    fn floating_bus_byte(&self, cc: i32, memory: &Memory, screen: Source) -> u8;

    /// Cycle at which an I/O access to `port` starting at `cc` completes,
    /// including any contention. `high_contended` tells whether the port's
    /// high byte addresses contended memory.
    fn add_wait_cycles(&self, cc: i32, port: u16, high_contended: bool) -> i32;

    /// Bring the display up to date before a write to video memory at `addr`
    /// lands at cycle `cc`.
    fn flush(&mut self, cc: i32, addr: u16);

    fn counters(&self) -> VideoCounters;

    /// Restore counters saved by `counters`.
    fn set_counters(&mut self, counters: VideoCounters);
}
