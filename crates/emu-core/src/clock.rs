//! Master clock conversions between cycles and host time.

/// Crystal frequency of the emulated CPU clock.
///
/// Cycle counts are the only unit of time inside a machine; this converts at
/// the edges, where audio blocks and host pacing speak seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterClock {
    /// Cycles per second (e.g. `3_500_000` for the 48K Spectrum).
    pub frequency_hz: u32,
}

impl MasterClock {
    #[must_use]
    pub const fn new(frequency_hz: u32) -> Self {
        Self { frequency_hz }
    }

    /// Duration of `cycles` in seconds.
    #[must_use]
    pub fn seconds(&self, cycles: i64) -> f64 {
        cycles as f64 / f64::from(self.frequency_hz)
    }

    /// Whole cycles elapsed in `seconds`, rounded to nearest.
    #[must_use]
    pub fn cycles(&self, seconds: f64) -> i32 {
        (seconds * f64::from(self.frequency_hz)).round() as i32
    }

    /// Frames per second for a frame of `cycles_per_frame` cycles.
    #[must_use]
    pub fn frame_rate(&self, cycles_per_frame: i32) -> f64 {
        f64::from(self.frequency_hz) / f64::from(cycles_per_frame)
    }
}
