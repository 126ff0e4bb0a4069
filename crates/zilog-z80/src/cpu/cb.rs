//! CB page: rotates, shifts and bit operations, plain and indexed.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

use crate::alu;
use crate::bus::Z80Bus;
use crate::flags::CF;

use super::{Index, Z80};

impl Z80 {
    /// Result of a CB operation on `value`, or `None` for BIT (flags only).
    /// `xy_source` supplies the undocumented X/Y bits for BIT.
    fn cb_op(&mut self, op: u8, value: u8, xy_source: u8) -> Option<u8> {
        let y = (op >> 3) & 7;
        match op >> 6 {
            0 => {
                let r = alu::shift_op(y, value, self.regs.f & CF != 0);
                self.regs.f = r.flags;
                Some(r.value)
            }
            1 => {
                self.regs.f = alu::bit(y, value, self.regs.f, xy_source);
                None
            }
            2 => Some(value & !(1 << y)),
            _ => Some(value | (1 << y)),
        }
    }

    pub(super) fn execute_cb<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) {
        let op = self.fetch_opcode(bus);
        let z = op & 7;
        if z == 6 {
            let hl = self.regs.hl();
            let value = self.read(bus, hl);
            self.contend(bus, hl, 1);
            let memptr_hi = (self.regs.wz >> 8) as u8;
            if let Some(result) = self.cb_op(op, value, memptr_hi) {
                self.write(bus, hl, result);
            }
        } else {
            let value = self.reg8(z, Index::Hl);
            if let Some(result) = self.cb_op(op, value, value) {
                self.set_reg8(z, Index::Hl, result);
            }
        }
    }

    /// DDCB/FDCB: displacement first, then an opcode byte that is read
    /// without an M1 cycle. Non-BIT results are also copied to the register
    /// named by the low bits (undocumented).
    pub(super) fn execute_index_cb<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, idx: Index) {
        let d = self.imm8(bus) as i8;
        let op_addr = self.regs.pc;
        let op = self.read(bus, op_addr);
        self.contend(bus, op_addr, 2);
        self.regs.pc = op_addr.wrapping_add(1);

        let addr = self.index_reg(idx).wrapping_add(d as u16);
        self.regs.wz = addr;
        let value = self.read(bus, addr);
        self.contend(bus, addr, 1);
        if let Some(result) = self.cb_op(op, value, (addr >> 8) as u8) {
            self.write(bus, addr, result);
            let z = op & 7;
            if z != 6 {
                self.set_reg8(z, Index::Hl, result);
            }
        }
    }
}
