//! Sinclair ULA timing.
//!
//! The ULA steals memory cycles from the CPU while it fetches the display,
//! drives the frame interrupt and leaks its fetches onto the data bus of
//! unattached ports. This crate models those effects as a
//! [`VideoTiming`] collaborator. Rendering is left to a front end, which
//! hooks in through [`UlaTiming::flush`] bookkeeping.
//!
//! # Timing
//!
//! All positions are CPU cycles from the start of the frame (the top of the
//! vertical retrace). The 48K has 224 T-states per line and 312 lines; the
//! 128K has 228 and 311.
//!
//! # Contention
//!
//! During the 192 screen lines, the first 128 T-states of every line are
//! contended. The delay repeats every 8 T-states: `[6, 5, 4, 3, 2, 1, 0, 0]`,
//! starting at the model's first contended cycle.
//!
//! # Screen memory layout
//!
//! Bitmap at $4000-$57FF, attributes at $5800-$5AFF.
//! Bitmap address: `010Y7 Y6Y2 Y1Y0 Y5Y4Y3 X4X3X2X1X0`
//! Attribute address: `0101 10Y7 Y6Y5 Y4Y3 X4X3X2X1X0`

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)] // Offsets are range-checked before the cast.

mod model;

use std::ops::Range;

use emu_core::{Memory, Observable, Source, Value, VideoCounters, VideoTiming};

pub use model::UlaModel;

/// Contention delay pattern (repeats every 8 T-states).
const CONTENTION_PATTERN: [u8; 8] = [6, 5, 4, 3, 2, 1, 0, 0];

/// Contended T-states at the start of each screen line.
const CONTENDED_TSTATES: i32 = 128;

/// Screen lines with display fetches.
const SCREEN_LINES: i32 = 192;

/// Number of frames between FLASH toggles.
const FLASH_FRAME_COUNT: u32 = 16;

/// ULA timing for one model.
#[derive(Debug, Clone)]
pub struct UlaTiming {
    model: UlaModel,
    /// Frames completed since power-on.
    frames: u64,
    /// Audio time accounted, in seconds.
    audio_time: f64,
    /// Cycle up to which the display has been brought up to date this frame.
    drawn_until: i32,
    /// Display flushes requested this frame.
    flushes: u32,
}

impl UlaTiming {
    #[must_use]
    pub fn new(model: UlaModel) -> Self {
        Self {
            model,
            frames: 0,
            audio_time: 0.0,
            drawn_until: 0,
            flushes: 0,
        }
    }

    #[must_use]
    pub fn model(&self) -> UlaModel {
        self.model
    }

    /// Frames completed since power-on.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Seconds of audio accounted through completed audio blocks.
    #[must_use]
    pub fn audio_time(&self) -> f64 {
        self.audio_time
    }

    /// FLASH attribute phase: true while flashing cells show inverted.
    #[must_use]
    pub fn flash_inverted(&self) -> bool {
        (self.frames / u64::from(FLASH_FRAME_COUNT)) % 2 == 1
    }

    /// Cycle the display has been brought up to in the current frame.
    #[must_use]
    pub fn drawn_until(&self) -> i32 {
        self.drawn_until
    }

    /// Flushes requested in the current frame.
    #[must_use]
    pub fn flushes(&self) -> u32 {
        self.flushes
    }

    /// Memory contention delay for an access starting at `cc`.
    #[must_use]
    pub fn contention_at(&self, cc: i32) -> u8 {
        let rel = cc - self.model.first_contended_cycle();
        if rel < 0 {
            return 0;
        }
        let line_len = self.model.cycles_per_line();
        if rel / line_len >= SCREEN_LINES {
            return 0;
        }
        let tstate = rel % line_len;
        if tstate < CONTENDED_TSTATES {
            CONTENTION_PATTERN[(tstate % 8) as usize]
        } else {
            0
        }
    }

    /// Delay before `cc` and advance: one contention check.
    fn contend(&self, cc: i32) -> i32 {
        cc + i32::from(self.contention_at(cc))
    }

    /// Screen position of the display fetch at `cc`: (pixel line, T-state
    /// within the fetch window), or `None` in border and retrace.
    fn fetch_position(&self, cc: i32) -> Option<(u8, i32)> {
        // Fetches begin one cycle after the first contended cycle.
        let rel = cc - self.model.first_contended_cycle() - 1;
        if rel < 0 {
            return None;
        }
        let line_len = self.model.cycles_per_line();
        let line = rel / line_len;
        let tstate = rel % line_len;
        if line >= SCREEN_LINES || tstate >= CONTENDED_TSTATES {
            return None;
        }
        Some((line as u8, tstate))
    }
}

/// Bitmap address for pixel line `y` and character column `col`.
#[must_use]
pub fn bitmap_addr(y: u8, col: u8) -> Option<u16> {
    if y >= SCREEN_LINES as u8 || col >= 32 {
        return None;
    }
    let y = u16::from(y);
    let y7y6 = (y >> 6) & 0x03;
    let y2y1y0 = y & 0x07;
    let y5y4y3 = (y >> 3) & 0x07;
    Some(0x4000 | (y7y6 << 11) | (y2y1y0 << 8) | (y5y4y3 << 5) | u16::from(col))
}

/// Attribute address for pixel line `y` and character column `col`.
#[must_use]
pub fn attr_addr(y: u8, col: u8) -> Option<u16> {
    if y >= SCREEN_LINES as u8 || col >= 32 {
        return None;
    }
    Some(0x5800 | (u16::from(y / 8) << 5) | u16::from(col))
}

impl VideoTiming for UlaTiming {
    fn cycles_per_frame(&self) -> i32 {
        self.model.cycles_per_frame()
    }

    fn cycles_per_line(&self) -> i32 {
        self.model.cycles_per_line()
    }

    fn contended_window(&self) -> Range<i32> {
        let first = self.model.first_contended_cycle();
        let last_line = first + (SCREEN_LINES - 1) * self.model.cycles_per_line();
        first..last_line + CONTENDED_TSTATES
    }

    fn int_length(&self) -> i32 {
        self.model.int_length()
    }

    /// Rotated so that entry `cc % line_len` holds the delay for `cc`.
    fn wait_table(&self) -> Vec<u8> {
        let line_len = self.model.cycles_per_line();
        let first = self.model.first_contended_cycle();
        (0..line_len)
            .map(|i| {
                let offset = (i - first).rem_euclid(line_len);
                if offset < CONTENDED_TSTATES {
                    CONTENTION_PATTERN[(offset % 8) as usize]
                } else {
                    0
                }
            })
            .collect()
    }

    fn frame_flyback(&mut self, cc: i32) -> i32 {
        self.frames += 1;
        self.drawn_until = 0;
        self.flushes = 0;
        log::trace!("ula: frame {} ends at cycle {cc}", self.frames);
        self.model.cycles_per_frame()
    }

    fn audio_block_end(&mut self, time: f64) {
        self.audio_time += time;
    }

    /// The ULA fetch pattern within each 8-T-state group is bitmap,
    /// attribute, bitmap+1, attribute+1, then four idle cycles.
    fn floating_bus_byte(&self, cc: i32, memory: &Memory, screen: Source) -> u8 {
        let Some((y, tstate)) = self.fetch_position(cc) else {
            return 0xFF;
        };
        let col = ((tstate / 8) * 2) as u8;
        let addr = match tstate % 8 {
            0 => bitmap_addr(y, col),
            1 => attr_addr(y, col),
            2 => bitmap_addr(y, col + 1),
            3 => attr_addr(y, col + 1),
            _ => None,
        };
        let Some(addr) = addr else {
            return 0xFF;
        };
        match screen {
            Source::Block { .. } => memory
                .byte_at(screen, usize::from(addr - 0x4000))
                .unwrap_or(0xFF),
            Source::Sink | Source::Unmapped => memory.peek(addr),
        }
    }

    /// Four I/O patterns, by high byte contention and ULA port (bit 0 clear):
    ///
    /// | High contended | ULA port | Pattern          |
    /// |----------------|----------|------------------|
    /// | No             | No       | N:4              |
    /// | No             | Yes      | N:1, C:3         |
    /// | Yes            | Yes      | C:1, C:3         |
    /// | Yes            | No       | C:1, C:1, C:1, C:1 |
    fn add_wait_cycles(&self, cc: i32, port: u16, high_contended: bool) -> i32 {
        let ula_port = port & 0x0001 == 0;
        let mut cc = if high_contended { self.contend(cc) } else { cc };
        cc += 1;
        match (high_contended, ula_port) {
            (_, true) => self.contend(cc) + 3,
            (true, false) => {
                for _ in 0..3 {
                    cc = self.contend(cc) + 1;
                }
                cc
            }
            (false, false) => cc + 3,
        }
    }

    fn flush(&mut self, cc: i32, addr: u16) {
        if cc > self.drawn_until {
            self.drawn_until = cc;
        }
        self.flushes += 1;
        log::trace!("ula: flush to {cc} for ${addr:04X}");
    }

    fn counters(&self) -> VideoCounters {
        VideoCounters {
            frames: self.frames,
            audio_time: self.audio_time,
            drawn_until: self.drawn_until,
            flushes: self.flushes,
        }
    }

    fn set_counters(&mut self, counters: VideoCounters) {
        self.frames = counters.frames;
        self.audio_time = counters.audio_time;
        self.drawn_until = counters.drawn_until;
        self.flushes = counters.flushes;
    }
}

const ULA_QUERY_PATHS: &[&str] = &[
    "model",
    "frames",
    "flash",
    "drawn_until",
    "flushes",
];

impl Observable for UlaTiming {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "model" => Some(self.model.name().into()),
            "frames" => Some(self.frames.into()),
            "flash" => Some(self.flash_inverted().into()),
            "drawn_until" => Some(self.drawn_until.into()),
            "flushes" => Some(self.flushes.into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        ULA_QUERY_PATHS
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    const FIRST: i32 = 14335;

    fn ula() -> UlaTiming {
        UlaTiming::new(UlaModel::Spectrum48K)
    }

    fn ram() -> Memory {
        let mut memory = Memory::new();
        let block = memory.add_block("ram", 0x1_0000, 0);
        let _ = memory.map(
            0x0000,
            0x1_0000,
            Source::block(block, 0),
            Source::block(block, 0),
            None,
            None,
        );
        memory
    }

    #[test]
    fn contention_in_screen_area() {
        let ula = ula();
        assert_eq!(ula.contention_at(FIRST), 6);
        assert_eq!(ula.contention_at(FIRST + 1), 5);
        assert_eq!(ula.contention_at(FIRST + 5), 1);
        assert_eq!(ula.contention_at(FIRST + 6), 0);
        assert_eq!(ula.contention_at(FIRST + 7), 0);
        assert_eq!(ula.contention_at(FIRST + 8), 6);
    }

    #[test]
    fn contention_outside_screen_area() {
        let ula = ula();
        assert_eq!(ula.contention_at(0), 0);
        assert_eq!(ula.contention_at(FIRST - 1), 0);
        // Right border of the first screen line.
        assert_eq!(ula.contention_at(FIRST + 128), 0);
        // Line after the last screen line.
        assert_eq!(ula.contention_at(FIRST + 192 * 224), 0);
    }

    #[test]
    fn wait_table_agrees_with_contention_inside_window() {
        let ula = ula();
        let table = ula.wait_table();
        assert_eq!(table.len(), 224);
        for cc in ula.contended_window() {
            let line_offset = (cc - FIRST) % 224;
            if line_offset < 128 {
                assert_eq!(
                    table[(cc % 224) as usize],
                    ula.contention_at(cc),
                    "cycle {cc}"
                );
            }
        }
    }

    #[test]
    fn contended_window_covers_all_screen_lines() {
        let window = ula().contended_window();
        assert_eq!(window.start, FIRST);
        assert_eq!(window.end, FIRST + 191 * 224 + 128);
    }

    #[test]
    fn io_contention_no_contended_no_ula() {
        let ula = ula();
        assert_eq!(ula.add_wait_cycles(FIRST, 0x00FF, false), FIRST + 4);
    }

    #[test]
    fn io_contention_no_contended_ula() {
        let ula = ula();
        // N:1 lands on the first contended cycle.
        assert_eq!(ula.add_wait_cycles(FIRST - 1, 0x00FE, false), FIRST - 1 + 4 + 6);
    }

    #[test]
    fn io_contention_contended_ula() {
        let ula = ula();
        // C:1 waits 6; the C:3 check then falls on an idle phase.
        assert_eq!(ula.add_wait_cycles(FIRST, 0x40FE, true), FIRST + 4 + 6);
    }

    #[test]
    fn io_contention_contended_not_ula() {
        let ula = ula();
        // 6 at the start, idle twice, then 6 again at the next group.
        assert_eq!(ula.add_wait_cycles(FIRST, 0x40FF, true), FIRST + 4 + 12);
    }

    #[test]
    fn io_contention_outside_screen_is_four_cycles() {
        let ula = ula();
        for port in [0x00FE, 0x00FF, 0x40FE, 0x40FF] {
            assert_eq!(ula.add_wait_cycles(100, port, port >= 0x4000), 104);
        }
    }

    #[test]
    fn screen_addresses() {
        assert_eq!(bitmap_addr(0, 0), Some(0x4000));
        assert_eq!(bitmap_addr(1, 0), Some(0x4100));
        assert_eq!(bitmap_addr(8, 0), Some(0x4020));
        assert_eq!(bitmap_addr(64, 31), Some(0x481F));
        assert_eq!(bitmap_addr(192, 0), None);
        assert_eq!(attr_addr(0, 0), Some(0x5800));
        assert_eq!(attr_addr(8, 1), Some(0x5821));
        assert_eq!(attr_addr(0, 32), None);
    }

    #[test]
    fn floating_bus_follows_fetch_phase() {
        let ula = ula();
        let mut memory = ram();
        memory.poke_slice(0x4000, &[0xAA, 0x55]);
        memory.poke_slice(0x5800, &[0x38, 0x07]);

        let start = FIRST + 1;
        assert_eq!(ula.floating_bus_byte(start, &memory, Source::Unmapped), 0xAA);
        assert_eq!(ula.floating_bus_byte(start + 1, &memory, Source::Unmapped), 0x38);
        assert_eq!(ula.floating_bus_byte(start + 2, &memory, Source::Unmapped), 0x55);
        assert_eq!(ula.floating_bus_byte(start + 3, &memory, Source::Unmapped), 0x07);
        for idle in 4..8 {
            assert_eq!(ula.floating_bus_byte(start + idle, &memory, Source::Unmapped), 0xFF);
        }
    }

    #[test]
    fn floating_bus_idle_outside_screen() {
        let ula = ula();
        let mut memory = ram();
        memory.poke(0x4000, 0x00);
        assert_eq!(ula.floating_bus_byte(0, &memory, Source::Unmapped), 0xFF);
        assert_eq!(ula.floating_bus_byte(FIRST, &memory, Source::Unmapped), 0xFF);
        assert_eq!(ula.floating_bus_byte(FIRST + 1 + 128, &memory, Source::Unmapped), 0xFF);
    }

    #[test]
    fn floating_bus_second_line() {
        let ula = ula();
        let mut memory = ram();
        memory.poke(0x4100, 0x81);
        assert_eq!(ula.floating_bus_byte(FIRST + 1 + 224, &memory, Source::Unmapped), 0x81);
    }

    #[test]
    fn floating_bus_reads_the_displayed_storage() {
        let ula = ula();
        let mut memory = ram();
        let shadow = memory.add_block("shadow", 0x4000, 0);
        memory.block_mut(shadow).cells_mut()[0x1800].data = 0x46;
        memory.poke(0x5800, 0x38);

        let start = FIRST + 1;
        let screen = Source::block(shadow, 0);
        assert_eq!(ula.floating_bus_byte(start + 1, &memory, screen), 0x46);
        assert_eq!(ula.floating_bus_byte(start, &memory, screen), 0x00);
        assert_eq!(
            ula.floating_bus_byte(start + 1, &memory, Source::Unmapped),
            0x38
        );
    }

    #[test]
    fn counters_carry_the_flash_phase() {
        let mut ula = ula();
        for _ in 0..20 {
            let _ = ula.frame_flyback(69_888);
        }
        ula.flush(300, 0x4000);
        let mut fresh = UlaTiming::new(UlaModel::Spectrum48K);
        fresh.set_counters(ula.counters());
        assert_eq!(fresh.frames(), 20);
        assert!(fresh.flash_inverted());
        assert_eq!(fresh.drawn_until(), 300);
        assert_eq!(fresh.counters(), ula.counters());
    }

    #[test]
    fn flyback_counts_frames_and_flash() {
        let mut ula = ula();
        assert!(!ula.flash_inverted());
        for _ in 0..16 {
            assert_eq!(ula.frame_flyback(69_888), 69_888);
        }
        assert!(ula.flash_inverted());
        for _ in 0..16 {
            let _ = ula.frame_flyback(69_888);
        }
        assert!(!ula.flash_inverted());
        assert_eq!(ula.frames(), 32);
    }

    #[test]
    fn flush_tracks_progress_until_flyback() {
        let mut ula = ula();
        ula.flush(20_000, 0x4000);
        ula.flush(18_000, 0x5800);
        assert_eq!(ula.drawn_until(), 20_000);
        assert_eq!(ula.flushes(), 2);
        let _ = ula.frame_flyback(69_888);
        assert_eq!(ula.drawn_until(), 0);
        assert_eq!(ula.query("frames"), Some(Value::U64(1)));
    }

    #[test]
    fn model_128k_timing() {
        let ula = UlaTiming::new(UlaModel::Spectrum128K);
        assert_eq!(ula.cycles_per_line(), 228);
        assert_eq!(ula.int_length(), 36);
        assert_eq!(ula.contention_at(14361), 6);
        assert_eq!(ula.wait_table()[(14361 % 228) as usize], 6);
    }
}
