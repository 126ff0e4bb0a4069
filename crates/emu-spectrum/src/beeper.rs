//! One-bit speaker on port `$FE` bit 4.
//!
//! Level changes are stamped with their time inside the current audio
//! block. At the end of the block they are rendered to samples at the host
//! rate; the host drains them with `take_samples`.

use std::any::Any;

use crate::chain::{BusCtx, Peripheral, PortMatch};
use crate::ula::ULA_PORTS;

/// Output amplitude of a high speaker level.
const VOLUME: f32 = 0.25;

#[derive(Debug)]
pub struct Beeper {
    sample_rate: u32,
    level: bool,
    /// Level changes in this block: (seconds since block start, new level).
    edges: Vec<(f64, bool)>,
    samples: Vec<f32>,
}

impl Beeper {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            level: false,
            edges: Vec::new(),
            samples: Vec::new(),
        }
    }

    #[must_use]
    pub fn level(&self) -> bool {
        self.level
    }

    /// Samples rendered by completed audio blocks.
    pub fn take_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }

    fn amplitude(level: bool) -> f32 {
        if level { VOLUME } else { 0.0 }
    }
}

impl Peripheral for Beeper {
    fn name(&self) -> &'static str {
        "beeper"
    }

    fn out_match(&self) -> Option<PortMatch> {
        Some(ULA_PORTS)
    }

    fn output(&mut self, ctx: &mut BusCtx<'_>, _port: u16, value: u8) {
        let level = value & 0x10 != 0;
        if level != self.level {
            self.edges.push((ctx.time, level));
            self.level = level;
        }
    }

    fn power_on(&mut self, _ctx: &mut BusCtx<'_>) {
        self.level = false;
        self.edges.clear();
        self.samples.clear();
    }

    fn audio_block_end(&mut self, time: f64) {
        let count = (time * f64::from(self.sample_rate)).round() as usize;
        // Level at block start is the one before the first edge.
        let mut level = self.edges.first().map_or(self.level, |&(_, l)| !l);
        let mut edges = self.edges.iter().peekable();
        self.samples.reserve(count);
        for n in 0..count {
            let t = n as f64 / f64::from(self.sample_rate);
            while let Some(&&(at, new_level)) = edges.peek() {
                if at > t {
                    break;
                }
                level = new_level;
                edges.next();
            }
            self.samples.push(Self::amplitude(level));
        }
        self.edges.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
