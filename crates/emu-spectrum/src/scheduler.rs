//! Frame scheduler.
//!
//! Each frame splits into three regions by the video model's contended
//! window:
//!
//! ```text
//! 0 .. window.start - 23      no contention possible, WAIT unchecked
//! window.start - 23 .. end    WAIT checked
//! end .. flyback              WAIT unchecked
//! ```
//!
//! The contended region opens one longest-instruction early so an
//! instruction that starts outside the window but reaches into it still
//! pays its wait states. Every CPU run is bounded by the region end and the
//! caller's target, and a run that ends at or past the frame length
//! triggers the flyback: the video model closes the frame, devices get
//! `frame_end`, the CPU counters and the caller's target move back by one
//! frame and INT is raised for the next.
//!
//! While a replay plays, frames end at the recorded instruction count
//! instead, and the replay checks that the cycle counter agrees.

use std::ops::Range;

use emu_core::{CellFlags, MAX_INSTRUCTION_CYCLES};
use zilog_z80::ExitReason;

use crate::replay::{FrameCheck, ReplayState};
use crate::spectrum::Spectrum;

/// Cell checks outside the contended region.
pub const UNCONTENDED_MODE: CellFlags = CellFlags::all().difference(CellFlags::WAIT);

/// Cell checks inside the contended region.
pub const CONTENDED_MODE: CellFlags = CellFlags::all();

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The target was reached.
    Completed,
    /// A breakpoint fired; the machine is between instructions and resumable.
    Break(ExitReason),
    /// Playback stopped: end of stream or a desync. Nothing runs until the
    /// host resolves it.
    ReplayHalted(ReplayState),
}

/// A stretch of the frame run with one set of cell checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// First cycle past the region. `i32::MAX` for the last region, which
    /// the frame length bounds instead.
    pub end: i32,
    pub mode: CellFlags,
}

/// The region holding cycle `cc`.
#[must_use]
pub fn region_at(window: Range<i32>, cc: i32) -> Region {
    let start = window.start - MAX_INSTRUCTION_CYCLES;
    if cc < start {
        Region {
            end: start,
            mode: UNCONTENDED_MODE,
        }
    } else if cc < window.end {
        Region {
            end: window.end,
            mode: CONTENDED_MODE,
        }
    } else {
        Region {
            end: i32::MAX,
            mode: UNCONTENDED_MODE,
        }
    }
}

impl Spectrum {
    /// Run until the cycle counter reaches `target`, which may lie several
    /// frames ahead of the current one.
    pub fn run_until(&mut self, target: i32) -> RunOutcome {
        self.drive(Some(target))
    }

    /// Run `cycles` T-states from now.
    pub fn run_for(&mut self, cycles: i32) -> RunOutcome {
        self.drive(Some(self.cpu.cc() + cycles))
    }

    /// Run to the next flyback.
    pub fn run_frame(&mut self) -> RunOutcome {
        self.drive(None)
    }

    /// Run one audio block of `cycles` T-states, then let devices render
    /// it. A block interrupted by a breakpoint finishes on the next call.
    pub fn run_audio_block(&mut self, cycles: i32) -> RunOutcome {
        let outcome = self.drive(Some(self.bus.audio_start + cycles));
        if outcome == RunOutcome::Completed {
            let cc = self.cpu.cc();
            let time = self.bus.block_time(cc);
            self.bus.chain.audio_block_end(time);
            self.bus.video.audio_block_end(time);
            self.bus.audio_start = cc;
        }
        outcome
    }

    /// `target` of `None` stops right after the next flyback.
    fn drive(&mut self, mut target: Option<i32>) -> RunOutcome {
        let cycles_per_frame = self.bus.video.cycles_per_frame();
        loop {
            if self.bus.replay.is_halted() {
                return RunOutcome::ReplayHalted(self.bus.replay.state().clone());
            }
            match self.frame_check(cycles_per_frame) {
                FrameCheck::Running => {}
                FrameCheck::Halted => continue,
                FrameCheck::Flyback => {
                    let len = self.flyback();
                    match target.as_mut() {
                        Some(target) => *target -= len,
                        None if !self.bus.replay.is_halted() => return RunOutcome::Completed,
                        None => {}
                    }
                    continue;
                }
            }

            let cc = self.cpu.cc();
            if target.is_some_and(|target| cc >= target) {
                return RunOutcome::Completed;
            }
            let (frame_limit, ic_limit) = self
                .bus
                .replay
                .playback_limits()
                .unwrap_or((cycles_per_frame, u64::MAX));
            let region = region_at(self.bus.video.contended_window(), cc);
            let limit = target.map_or(frame_limit, |t| t.min(frame_limit)).min(region.end);

            match self.cpu.run(&mut self.bus, limit, ic_limit, region.mode) {
                ExitReason::CycleLimitReached
                | ExitReason::InstructionLimitReached
                | ExitReason::Stopped => {}
                reason => {
                    log::debug!("scheduler: {reason} at cycle {}", self.cpu.cc());
                    return RunOutcome::Break(reason);
                }
            }
        }
    }

    fn frame_check(&mut self, cycles_per_frame: i32) -> FrameCheck {
        let cc = self.cpu.cc();
        if self.bus.replay.is_playing() {
            self.bus
                .replay
                .check_frame(cc, self.cpu.instructions(), cycles_per_frame)
        } else if cc >= cycles_per_frame {
            FrameCheck::Flyback
        } else {
            FrameCheck::Running
        }
    }

    /// Close the frame at the current cycle. Returns the frame length.
    fn flyback(&mut self) -> i32 {
        let cc = self.cpu.cc();
        let ic = self.cpu.instructions();
        let len = self.bus.video.frame_flyback(cc);
        self.bus.chain.frame_end(cc, len);
        self.cpu.rebase(len);
        self.cpu.assert_int(self.bus.video.int_length());
        self.bus.audio_start -= len;
        self.frames += 1;

        if self.bus.replay.is_recording() {
            let snapshot = self
                .bus
                .replay
                .wants_snapshot(self.config.replay_snapshot_interval)
                .then(|| self.save_state());
            self.bus.replay.record_frame_end(ic, cc, snapshot);
        } else if self.bus.replay.is_playing() {
            self.bus.replay.next_frame(ic);
        }
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Range<i32> = 14335..14335 + 191 * 224 + 128;

    #[test]
    fn regions_split_around_the_window() {
        let early = region_at(WINDOW, 0);
        assert_eq!(early.end, 14335 - 23);
        assert!(!early.mode.contains(CellFlags::WAIT));

        let contended = region_at(WINDOW, 14335 - 23);
        assert_eq!(contended.end, WINDOW.end);
        assert!(contended.mode.contains(CellFlags::WAIT));

        let late = region_at(WINDOW, WINDOW.end);
        assert_eq!(late.end, i32::MAX);
        assert_eq!(late.mode, UNCONTENDED_MODE);
    }

    #[test]
    fn uncontended_mode_keeps_every_other_check() {
        assert!(UNCONTENDED_MODE.contains(CellFlags::BREAKPOINTS));
        assert!(UNCONTENDED_MODE.contains(CellFlags::PATCH_ON_EXEC | CellFlags::VIDEO_TRACK));
    }
}
