//! Deterministic record and playback of port input.
//!
//! A recording is a list of frames. Each frame stores how many instructions
//! it ran, the cycle at which its flyback happened and every byte `IN`
//! returned, stamped with the frame cycle of the access. Playback runs each
//! frame to exactly its instruction count and hands the CPU the recorded
//! bytes instead of asking the devices.
//!
//! Any disagreement between the stream and the machine moves the replay to
//! `OutOfSync` and stops the CPU at the next instruction boundary. Nothing
//! is resynchronised: the host either goes live or loads a snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ReplayError;
use crate::snapshot::MachineState;

pub const REPLAY_VERSION: u32 = 1;

/// Cycles a played-back frame may end away from its recorded flyback cycle.
pub const REPLAY_CYCLE_SLACK: i32 = 4;

/// Largest `end_cycle` a stream may carry. Leaves room for the slack.
const MAX_END_CYCLE: i32 = i32::MAX - REPLAY_CYCLE_SLACK - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSample {
    /// Frame cycle at which the I/O access started.
    pub cycle: i32,
    pub value: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    pub instructions: u64,
    /// Cycle counter when the frame ended. Below the frame length only for a
    /// trailing frame cut short by the end of the recording.
    pub end_cycle: i32,
    pub inputs: Vec<InputSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<MachineState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayStream {
    pub version: u32,
    pub frames: Vec<ReplayFrame>,
}

impl Default for ReplayStream {
    fn default() -> Self {
        Self {
            version: REPLAY_VERSION,
            frames: Vec::new(),
        }
    }
}

impl ReplayStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self, ReplayError> {
        let stream: Self = serde_json::from_str(text)?;
        stream.validate()?;
        Ok(stream)
    }

    /// Check the version and that every frame's bounds are usable.
    pub fn validate(&self) -> Result<(), ReplayError> {
        if self.version != REPLAY_VERSION {
            return Err(ReplayError::Version(self.version));
        }
        let mut total: u64 = 0;
        for (index, frame) in self.frames.iter().enumerate() {
            if !(0..=MAX_END_CYCLE).contains(&frame.end_cycle) {
                return Err(ReplayError::Frame {
                    frame: index,
                    reason: "end cycle out of range",
                });
            }
            total = total
                .checked_add(frame.instructions)
                .ok_or(ReplayError::Frame {
                    frame: index,
                    reason: "instruction count overflows",
                })?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ReplayError> {
        Ok(serde_json::to_string(self)?)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total instructions over every frame.
    #[must_use]
    pub fn instructions(&self) -> u64 {
        self.frames
            .iter()
            .fold(0, |total, f| total.saturating_add(f.instructions))
    }
}

/// Why playback stopped trusting the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutOfSync {
    #[error("frame {frame}: input at cycle {cycle} after the recorded inputs ran out")]
    InputsExhausted { frame: usize, cycle: i32 },
    #[error("frame {frame}: input at cycle {found}, recorded at cycle {expected}")]
    InputCycle {
        frame: usize,
        expected: i32,
        found: i32,
    },
    #[error("frame {frame}: ended with {remaining} recorded inputs unread")]
    UnreadInputs { frame: usize, remaining: usize },
    #[error("frame {frame}: instruction count reached at cycle {cycle}, before the flyback")]
    EndedEarly { frame: usize, cycle: i32 },
    #[error("frame {frame}: cycle {cycle} overruns the recorded end at {recorded}")]
    Overrun {
        frame: usize,
        cycle: i32,
        recorded: i32,
    },
    #[error("frame {frame}: instruction count reached at cycle {cycle}, recorded end at {recorded}")]
    Boundary {
        frame: usize,
        cycle: i32,
        recorded: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    Recording,
    Playing,
    /// Playback consumed the last frame. Resolved by going live or
    /// starting a recording.
    EndOfFile,
    OutOfSync(OutOfSync),
}

impl fmt::Display for ReplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Recording => f.write_str("recording"),
            Self::Playing => f.write_str("playing"),
            Self::EndOfFile => f.write_str("end of file"),
            Self::OutOfSync(cause) => write!(f, "out of sync ({cause})"),
        }
    }
}

/// Playback's verdict on the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameCheck {
    Running,
    Flyback,
    Halted,
}

#[derive(Debug)]
pub struct Replay {
    state: ReplayState,
    stream: ReplayStream,
    /// Frame being recorded or played.
    frame: usize,
    /// Next input of the frame being played.
    cursor: usize,
    /// Instruction counter at the start of the current frame.
    frame_start_ic: u64,
}

impl Default for Replay {
    fn default() -> Self {
        Self::new()
    }
}

impl Replay {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ReplayState::Idle,
            stream: ReplayStream::new(),
            frame: 0,
            cursor: 0,
            frame_start_ic: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> &ReplayState {
        &self.state
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.state == ReplayState::Recording
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state == ReplayState::Playing
    }

    /// True while the machine must not run until the host decides.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        matches!(self.state, ReplayState::EndOfFile | ReplayState::OutOfSync(_))
    }

    /// Index of the frame being recorded or played.
    #[must_use]
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Frames recorded so far, including the open one.
    #[must_use]
    pub fn recorded_frames(&self) -> usize {
        if self.is_recording() { self.stream.len() } else { 0 }
    }

    fn refuse(&self, action: &'static str) -> ReplayError {
        ReplayError::State {
            action,
            state: self.state.to_string(),
        }
    }

    fn desync(&mut self, cause: OutOfSync) {
        log::warn!("replay: out of sync: {cause}");
        self.state = ReplayState::OutOfSync(cause);
    }

    /// Drop any stream and accept live input again.
    pub fn go_live(&mut self) {
        if self.state != ReplayState::Idle {
            log::info!("replay: {} -> idle", self.state);
        }
        *self = Self::new();
    }

    pub(crate) fn check_can_record(&self) -> Result<(), ReplayError> {
        match self.state {
            ReplayState::Idle | ReplayState::EndOfFile => Ok(()),
            _ => Err(self.refuse("start recording")),
        }
    }

    /// Open frame 0 with the machine state it starts from.
    pub(crate) fn begin_recording(&mut self, ic: u64, snapshot: MachineState) {
        log::info!("replay: recording");
        self.stream = ReplayStream::new();
        self.stream.frames.push(ReplayFrame {
            snapshot: Some(snapshot),
            ..ReplayFrame::default()
        });
        self.state = ReplayState::Recording;
        self.frame = 0;
        self.cursor = 0;
        self.frame_start_ic = ic;
    }

    fn close_frame(&mut self, ic: u64, cc: i32) {
        if let Some(frame) = self.stream.frames.last_mut() {
            frame.instructions = ic - self.frame_start_ic;
            frame.end_cycle = cc;
        }
    }

    /// Whether the frame about to open should carry a snapshot.
    pub(crate) fn wants_snapshot(&self, interval: u32) -> bool {
        interval != 0 && self.stream.len() % interval as usize == 0
    }

    /// Close the current frame at a flyback and open the next.
    pub(crate) fn record_frame_end(&mut self, ic: u64, cc: i32, snapshot: Option<MachineState>) {
        self.close_frame(ic, cc);
        self.stream.frames.push(ReplayFrame {
            snapshot,
            ..ReplayFrame::default()
        });
        self.frame += 1;
        self.frame_start_ic = ic;
    }

    /// Close the open frame and hand back the stream.
    pub(crate) fn end_recording(&mut self, ic: u64, cc: i32) -> Result<ReplayStream, ReplayError> {
        if !self.is_recording() {
            return Err(self.refuse("stop recording"));
        }
        self.close_frame(ic, cc);
        let mut stream = std::mem::take(&mut self.stream);
        if stream.len() > 1 && stream.frames.last().is_some_and(|f| f.instructions == 0) {
            stream.frames.pop();
        }
        log::info!(
            "replay: recorded {} frames, {} instructions",
            stream.len(),
            stream.instructions()
        );
        self.go_live();
        Ok(stream)
    }

    /// Validate a playback request and return the snapshot to start from.
    pub(crate) fn check_playback<'s>(
        &self,
        stream: &'s ReplayStream,
        frame: usize,
    ) -> Result<&'s MachineState, ReplayError> {
        if matches!(self.state, ReplayState::Recording | ReplayState::Playing) {
            return Err(self.refuse("start playback"));
        }
        stream.validate()?;
        stream
            .frames
            .get(frame)
            .ok_or(ReplayError::NoFrame(frame))?
            .snapshot
            .as_ref()
            .ok_or(ReplayError::NoSnapshot(frame))
    }

    /// Start playing `stream` at `frame`; the machine already holds that
    /// frame's snapshot.
    pub(crate) fn begin_playback(&mut self, stream: ReplayStream, frame: usize, ic: u64) {
        log::info!("replay: playing from frame {frame} of {}", stream.len());
        self.stream = stream;
        self.state = ReplayState::Playing;
        self.frame = frame;
        self.cursor = 0;
        self.frame_start_ic = ic;
    }

    /// An `IN` resolved to `byte` at `cc`; returns the byte the CPU sees.
    pub(crate) fn on_input(&mut self, cc: i32, byte: u8) -> u8 {
        match self.state {
            ReplayState::Recording => {
                if let Some(frame) = self.stream.frames.last_mut() {
                    frame.inputs.push(InputSample { cycle: cc, value: byte });
                }
                byte
            }
            ReplayState::Playing => {
                let frame = self.frame;
                match self.stream.frames[frame].inputs.get(self.cursor).copied() {
                    None => {
                        self.desync(OutOfSync::InputsExhausted { frame, cycle: cc });
                        byte
                    }
                    Some(sample) if sample.cycle != cc => {
                        self.desync(OutOfSync::InputCycle {
                            frame,
                            expected: sample.cycle,
                            found: cc,
                        });
                        byte
                    }
                    Some(sample) => {
                        self.cursor += 1;
                        sample.value
                    }
                }
            }
            _ => byte,
        }
    }

    /// Bounds for the next CPU run while playing: a cycle limit just past
    /// the slack and the frame's instruction count.
    pub(crate) fn playback_limits(&self) -> Option<(i32, u64)> {
        if !self.is_playing() {
            return None;
        }
        let frame = &self.stream.frames[self.frame];
        Some((
            frame.end_cycle.saturating_add(REPLAY_CYCLE_SLACK + 1),
            self.frame_start_ic.saturating_add(frame.instructions),
        ))
    }

    /// Decide whether the frame being played has ended, and whether it
    /// ended where the recording says.
    pub(crate) fn check_frame(&mut self, cc: i32, ic: u64, cycles_per_frame: i32) -> FrameCheck {
        let index = self.frame;
        let last = index + 1 == self.stream.len();
        let frame = &self.stream.frames[index];
        let recorded = frame.end_cycle;
        let end_ic = self.frame_start_ic.saturating_add(frame.instructions);
        let remaining = frame.inputs.len().saturating_sub(self.cursor);
        let partial = recorded < cycles_per_frame;

        if cc > recorded.saturating_add(REPLAY_CYCLE_SLACK) {
            self.desync(OutOfSync::Overrun {
                frame: index,
                cycle: cc,
                recorded,
            });
            return FrameCheck::Halted;
        }
        if ic < end_ic {
            return FrameCheck::Running;
        }
        if remaining > 0 {
            self.desync(OutOfSync::UnreadInputs {
                frame: index,
                remaining,
            });
            return FrameCheck::Halted;
        }
        if cc < recorded.saturating_sub(REPLAY_CYCLE_SLACK) {
            self.desync(OutOfSync::Boundary {
                frame: index,
                cycle: cc,
                recorded,
            });
            return FrameCheck::Halted;
        }
        if cc < cycles_per_frame {
            if partial && last {
                log::info!("replay: end of file mid-frame at cycle {cc}");
                self.state = ReplayState::EndOfFile;
                return FrameCheck::Halted;
            }
            self.desync(OutOfSync::EndedEarly {
                frame: index,
                cycle: cc,
            });
            return FrameCheck::Halted;
        }
        FrameCheck::Flyback
    }

    /// Move to the next frame after a played-back flyback.
    pub(crate) fn next_frame(&mut self, ic: u64) {
        self.frame += 1;
        self.cursor = 0;
        self.frame_start_ic = ic;
        if self.frame >= self.stream.len() {
            log::info!("replay: end of file after {} frames", self.stream.len());
            self.state = ReplayState::EndOfFile;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPF: i32 = 69_888;

    fn recorded() -> ReplayStream {
        ReplayStream {
            version: REPLAY_VERSION,
            frames: vec![
                ReplayFrame {
                    instructions: 10,
                    end_cycle: CPF + 3,
                    inputs: vec![
                        InputSample { cycle: 100, value: 0x1F },
                        InputSample { cycle: 200, value: 0xBF },
                    ],
                    snapshot: Some(MachineState::default()),
                },
                ReplayFrame {
                    instructions: 5,
                    end_cycle: 40,
                    inputs: Vec::new(),
                    snapshot: None,
                },
            ],
        }
    }

    fn playing() -> Replay {
        let mut replay = Replay::new();
        replay.begin_playback(recorded(), 0, 1000);
        replay
    }

    #[test]
    fn recording_captures_inputs_per_frame() {
        let mut replay = Replay::new();
        replay.begin_recording(50, MachineState::default());
        assert_eq!(replay.on_input(10, 0xAA), 0xAA);
        replay.record_frame_end(80, CPF + 2, None);
        replay.on_input(5, 0xBB);
        let stream = replay.end_recording(90, 300).expect("recording");

        assert_eq!(stream.len(), 2);
        assert_eq!(stream.frames[0].instructions, 30);
        assert_eq!(stream.frames[0].end_cycle, CPF + 2);
        assert_eq!(stream.frames[0].inputs, vec![InputSample { cycle: 10, value: 0xAA }]);
        assert!(stream.frames[0].snapshot.is_some());
        assert_eq!(stream.frames[1].instructions, 10);
        assert_eq!(replay.state(), &ReplayState::Idle);
    }

    #[test]
    fn empty_trailing_frame_is_dropped() {
        let mut replay = Replay::new();
        replay.begin_recording(0, MachineState::default());
        replay.record_frame_end(10, CPF, None);
        let stream = replay.end_recording(10, 0).expect("recording");
        assert_eq!(stream.len(), 1);
    }

    #[test]
    fn snapshot_interval() {
        let mut replay = Replay::new();
        replay.begin_recording(0, MachineState::default());
        assert!(!replay.wants_snapshot(2));
        replay.record_frame_end(1, CPF, None);
        assert!(replay.wants_snapshot(2));
        assert!(!replay.wants_snapshot(0));
    }

    #[test]
    fn playback_substitutes_recorded_bytes() {
        let mut replay = playing();
        assert_eq!(replay.on_input(100, 0xFF), 0x1F);
        assert_eq!(replay.on_input(200, 0xFF), 0xBF);
        assert!(replay.is_playing());
    }

    #[test]
    fn input_at_wrong_cycle_desyncs() {
        let mut replay = playing();
        replay.on_input(101, 0xFF);
        assert_eq!(
            replay.state(),
            &ReplayState::OutOfSync(OutOfSync::InputCycle {
                frame: 0,
                expected: 100,
                found: 101
            })
        );
        assert!(replay.is_halted());
    }

    #[test]
    fn extra_input_desyncs() {
        let mut replay = playing();
        replay.on_input(100, 0);
        replay.on_input(200, 0);
        replay.on_input(300, 0);
        assert!(matches!(
            replay.state(),
            ReplayState::OutOfSync(OutOfSync::InputsExhausted { cycle: 300, .. })
        ));
    }

    #[test]
    fn frame_end_checks() {
        let mut replay = playing();
        assert_eq!(replay.playback_limits(), Some((CPF + 3 + REPLAY_CYCLE_SLACK + 1, 1010)));
        assert_eq!(replay.check_frame(CPF + 1, 1005, CPF), FrameCheck::Running);
        assert_eq!(replay.check_frame(CPF + 3, 1010, CPF), FrameCheck::Halted);
        assert!(matches!(
            replay.state(),
            ReplayState::OutOfSync(OutOfSync::UnreadInputs { remaining: 2, .. })
        ));

        let mut replay = playing();
        replay.on_input(100, 0);
        replay.on_input(200, 0);
        assert_eq!(replay.check_frame(CPF - 1, 1010, CPF), FrameCheck::Halted);
        assert!(matches!(
            replay.state(),
            ReplayState::OutOfSync(OutOfSync::EndedEarly { .. })
        ));

        let mut replay = playing();
        assert_eq!(
            replay.check_frame(CPF + 3 + REPLAY_CYCLE_SLACK + 1, 1008, CPF),
            FrameCheck::Halted
        );
        assert!(matches!(
            replay.state(),
            ReplayState::OutOfSync(OutOfSync::Overrun { .. })
        ));
    }

    #[test]
    fn frame_ending_before_its_recorded_cycle_desyncs() {
        let mut replay = playing();
        replay.on_input(100, 0);
        replay.on_input(200, 0);
        assert_eq!(
            replay.check_frame(CPF + 3 - REPLAY_CYCLE_SLACK, 1010, CPF),
            FrameCheck::Flyback
        );

        let mut stream = recorded();
        stream.frames[0].end_cycle = CPF + 30;
        let mut replay = Replay::new();
        replay.begin_playback(stream, 0, 1000);
        replay.on_input(100, 0);
        replay.on_input(200, 0);
        assert_eq!(replay.check_frame(CPF + 3, 1010, CPF), FrameCheck::Halted);
        assert_eq!(
            replay.state(),
            &ReplayState::OutOfSync(OutOfSync::Boundary {
                frame: 0,
                cycle: CPF + 3,
                recorded: CPF + 30
            })
        );
    }

    #[test]
    fn out_of_range_frames_are_rejected() {
        let mut stream = recorded();
        stream.frames[0].end_cycle = i32::MAX;
        assert!(matches!(
            stream.validate(),
            Err(ReplayError::Frame { frame: 0, .. })
        ));
        assert!(matches!(
            Replay::new().check_playback(&stream, 0),
            Err(ReplayError::Frame { frame: 0, .. })
        ));

        let mut stream = recorded();
        stream.frames[1].end_cycle = -1;
        assert!(stream.validate().is_err());

        let mut stream = recorded();
        stream.frames[1].instructions = u64::MAX;
        assert!(matches!(
            stream.validate(),
            Err(ReplayError::Frame { frame: 1, .. })
        ));
        assert_eq!(stream.instructions(), u64::MAX);
    }

    #[test]
    fn limits_saturate_near_the_counter_range() {
        let mut replay = Replay::new();
        replay.begin_playback(recorded(), 0, u64::MAX - 2);
        assert_eq!(
            replay.playback_limits(),
            Some((CPF + 3 + REPLAY_CYCLE_SLACK + 1, u64::MAX))
        );
        assert_eq!(replay.check_frame(CPF, u64::MAX - 1, CPF), FrameCheck::Running);
    }

    #[test]
    fn trailing_partial_frame_ends_the_file() {
        let mut replay = playing();
        replay.on_input(100, 0);
        replay.on_input(200, 0);
        assert_eq!(replay.check_frame(CPF + 3, 1010, CPF), FrameCheck::Flyback);
        replay.next_frame(1010);
        assert_eq!(replay.check_frame(40, 1015, CPF), FrameCheck::Halted);
        assert_eq!(replay.state(), &ReplayState::EndOfFile);
    }

    #[test]
    fn transitions_are_checked() {
        let mut replay = playing();
        assert!(matches!(
            replay.check_can_record(),
            Err(ReplayError::State { .. })
        ));
        assert!(replay.end_recording(0, 0).is_err());
        replay.go_live();
        assert!(replay.check_can_record().is_ok());

        let stream = recorded();
        assert!(matches!(
            replay.check_playback(&stream, 1),
            Err(ReplayError::NoSnapshot(1))
        ));
        assert!(matches!(
            replay.check_playback(&stream, 7),
            Err(ReplayError::NoFrame(7))
        ));
        assert!(replay.check_playback(&stream, 0).is_ok());
    }

    #[test]
    fn stream_json_round_trip_checks_version() {
        let json = recorded().to_json().expect("serialisable");
        assert_eq!(ReplayStream::from_json(&json).expect("parses"), recorded());
        let future = json.replacen("\"version\":1", "\"version\":9", 1);
        assert!(matches!(
            ReplayStream::from_json(&future),
            Err(ReplayError::Version(9))
        ));
    }
}
