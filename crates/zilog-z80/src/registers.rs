//! Z80 register file.

#![allow(clippy::cast_possible_truncation)] // Byte halves of register pairs.

use serde::{Deserialize, Serialize};

/// Programmer-visible and internal CPU state.
///
/// Snapshot loaders and debuggers replace this wholesale through
/// `Z80::set_registers`; the CPU mutates it only while executing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,

    pub a_alt: u8,
    pub f_alt: u8,
    pub b_alt: u8,
    pub c_alt: u8,
    pub d_alt: u8,
    pub e_alt: u8,
    pub h_alt: u8,
    pub l_alt: u8,

    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub i: u8,
    pub r: u8,

    /// MEMPTR. Leaks into the X/Y flags of `BIT n,(HL)`.
    pub wz: u16,

    pub iff1: bool,
    pub iff2: bool,
    pub im: u8,
    pub halted: bool,
}

const fn pair(hi: u8, lo: u8) -> u16 {
    (hi as u16) << 8 | lo as u16
}

impl Registers {
    /// State after /RESET: everything zero except AF and SP at `$FFFF`.
    #[must_use]
    pub fn power_on() -> Self {
        Self {
            a: 0xFF,
            f: 0xFF,
            sp: 0xFFFF,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn af(&self) -> u16 {
        pair(self.a, self.f)
    }

    #[must_use]
    pub const fn bc(&self) -> u16 {
        pair(self.b, self.c)
    }

    #[must_use]
    pub const fn de(&self) -> u16 {
        pair(self.d, self.e)
    }

    #[must_use]
    pub const fn hl(&self) -> u16 {
        pair(self.h, self.l)
    }

    /// The IR pair as driven on the address bus during refresh.
    #[must_use]
    pub const fn ir(&self) -> u16 {
        pair(self.i, self.r)
    }

    pub fn set_af(&mut self, value: u16) {
        self.a = (value >> 8) as u8;
        self.f = value as u8;
    }

    pub fn set_bc(&mut self, value: u16) {
        self.b = (value >> 8) as u8;
        self.c = value as u8;
    }

    pub fn set_de(&mut self, value: u16) {
        self.d = (value >> 8) as u8;
        self.e = value as u8;
    }

    pub fn set_hl(&mut self, value: u16) {
        self.h = (value >> 8) as u8;
        self.l = value as u8;
    }

    /// Bump the low seven bits of R, leaving bit 7 alone.
    pub fn inc_r(&mut self) {
        self.r = (self.r & 0x80) | (self.r.wrapping_add(1) & 0x7F);
    }

    /// `EX AF,AF'`.
    pub fn ex_af(&mut self) {
        std::mem::swap(&mut self.a, &mut self.a_alt);
        std::mem::swap(&mut self.f, &mut self.f_alt);
    }

    /// `EXX`.
    pub fn exx(&mut self) {
        std::mem::swap(&mut self.b, &mut self.b_alt);
        std::mem::swap(&mut self.c, &mut self.c_alt);
        std::mem::swap(&mut self.d, &mut self.d_alt);
        std::mem::swap(&mut self.e, &mut self.e_alt);
        std::mem::swap(&mut self.h, &mut self.h_alt);
        std::mem::swap(&mut self.l, &mut self.l_alt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r_keeps_bit_seven() {
        let mut regs = Registers {
            r: 0xFF,
            ..Registers::default()
        };
        regs.inc_r();
        assert_eq!(regs.r, 0x80);
    }

    #[test]
    fn exx_leaves_af_alone() {
        let mut regs = Registers::power_on();
        regs.set_bc(0x1234);
        regs.exx();
        assert_eq!(regs.bc(), 0);
        assert_eq!(regs.b_alt, 0x12);
        assert_eq!(regs.af(), 0xFFFF);
    }
}
