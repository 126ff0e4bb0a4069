//! Kempston joystick interface on port `$1F`.

use std::any::Any;

use bitflags::bitflags;

use crate::chain::{BusCtx, Peripheral, PortMatch, PortRead};

bitflags! {
    /// Joystick lines, active high.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KempstonButtons: u8 {
        const RIGHT = 1 << 0;
        const LEFT = 1 << 1;
        const DOWN = 1 << 2;
        const UP = 1 << 3;
        const FIRE = 1 << 4;
    }
}

/// Decodes any port with A5-A7 low.
#[derive(Debug, Default)]
pub struct Kempston {
    buttons: KempstonButtons,
}

impl Kempston {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, buttons: KempstonButtons, pressed: bool) {
        self.buttons.set(buttons, pressed);
    }

    #[must_use]
    pub fn buttons(&self) -> KempstonButtons {
        self.buttons
    }
}

impl Peripheral for Kempston {
    fn name(&self) -> &'static str {
        "kempston"
    }

    fn in_match(&self) -> Option<PortMatch> {
        Some(PortMatch::new(0x00E0, 0x0000))
    }

    fn input(&mut self, _ctx: &mut BusCtx<'_>, _port: u16) -> PortRead {
        PortRead::byte(self.buttons.bits())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
