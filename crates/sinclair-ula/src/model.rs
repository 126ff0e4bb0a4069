//! Per-model ULA constants.

use serde::{Deserialize, Serialize};

/// Which ULA revision drives the timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UlaModel {
    /// 48K issue 2/3 ULA.
    Spectrum48K,
    /// 128K/+2 ULA (slightly longer lines, one fewer line per frame).
    Spectrum128K,
}

impl UlaModel {
    /// CPU T-states per scanline.
    #[must_use]
    pub const fn cycles_per_line(self) -> i32 {
        match self {
            Self::Spectrum48K => 224,
            Self::Spectrum128K => 228,
        }
    }

    /// Scanlines per frame.
    #[must_use]
    pub const fn lines_per_frame(self) -> i32 {
        match self {
            Self::Spectrum48K => 312,
            Self::Spectrum128K => 311,
        }
    }

    #[must_use]
    pub const fn cycles_per_frame(self) -> i32 {
        self.cycles_per_line() * self.lines_per_frame()
    }

    /// First cycle of the frame at which a contended access is delayed.
    #[must_use]
    pub const fn first_contended_cycle(self) -> i32 {
        match self {
            Self::Spectrum48K => 14335,
            Self::Spectrum128K => 14361,
        }
    }

    /// Length of the INT pulse after flyback.
    #[must_use]
    pub const fn int_length(self) -> i32 {
        match self {
            Self::Spectrum48K => 32,
            Self::Spectrum128K => 36,
        }
    }

    /// CPU clock in Hz.
    #[must_use]
    pub const fn cpu_frequency(self) -> u32 {
        match self {
            Self::Spectrum48K => 3_500_000,
            Self::Spectrum128K => 3_546_900,
        }
    }

    /// Short identifier used in config files and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Spectrum48K => "48k",
            Self::Spectrum128K => "128k",
        }
    }
}
