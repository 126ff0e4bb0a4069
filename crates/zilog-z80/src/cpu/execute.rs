//! Unprefixed and DD/FD-prefixed instructions.
//!
//! Opcodes are decoded by their `x/y/z/p/q` fields. A DD or FD prefix only
//! changes which register stands in for HL (and turns `(HL)` into
//! `(IX+d)`), so both pages share one decoder.

#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

use crate::alu;
use crate::bus::Z80Bus;
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF};

use super::{Index, Z80};

impl Z80 {
    /// Fetch and execute one instruction, prefixes included.
    pub(super) fn execute<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) {
        let mut opcode = self.fetch_opcode(bus);
        let mut idx = Index::Hl;
        if opcode == 0xDD || opcode == 0xFD {
            idx = if opcode == 0xDD { Index::Ix } else { Index::Iy };
            // A prefix followed by another prefix acts as a NOP; the next
            // prefix starts a new instruction.
            let next = bus.memory().peek(self.regs.pc);
            if next == 0xDD || next == 0xFD {
                self.int_blocked = true;
                return;
            }
            opcode = self.fetch_opcode(bus);
        }

        match opcode {
            0xCB if idx == Index::Hl => self.execute_cb(bus),
            0xCB => self.execute_index_cb(bus, idx),
            0xED => self.execute_ed(bus),
            _ => self.execute_main(bus, opcode, idx),
        }
    }

    /// Effective address of the memory operand: HL, or IX/IY plus a
    /// displacement read from the instruction stream.
    fn operand_addr<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, idx: Index) -> u16 {
        if idx == Index::Hl {
            return self.regs.hl();
        }
        let d_addr = self.regs.pc;
        let d = self.imm8(bus) as i8;
        self.contend(bus, d_addr, 5);
        let addr = self.index_reg(idx).wrapping_add(d as u16);
        self.regs.wz = addr;
        addr
    }

    fn jr<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) {
        let d_addr = self.regs.pc;
        let d = self.imm8(bus) as i8;
        self.contend(bus, d_addr, 5);
        self.regs.pc = self.regs.pc.wrapping_add(d as u16);
        self.regs.wz = self.regs.pc;
    }

    fn skip_imm8<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) {
        let _ = self.imm8(bus);
    }

    fn call<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, taken: bool) {
        let lo = self.imm8(bus);
        let hi_addr = self.regs.pc;
        let hi = self.read(bus, hi_addr);
        let target = u16::from_le_bytes([lo, hi]);
        self.regs.wz = target;
        if taken {
            self.contend(bus, hi_addr, 1);
            self.regs.pc = hi_addr.wrapping_add(1);
            self.push(bus, self.regs.pc);
            self.regs.pc = target;
        } else {
            self.regs.pc = hi_addr.wrapping_add(1);
        }
    }

    fn ret<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) {
        self.regs.pc = self.pop(bus);
        self.regs.wz = self.regs.pc;
    }

    fn set_f(&mut self, f: u8) {
        self.regs.f = f;
    }

    fn execute_main<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, op: u8, idx: Index) {
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        let q = y & 1;

        match (x, z) {
            // =================================================================
            // x = 0
            // =================================================================
            (0, 0) => match y {
                0 => {}
                1 => self.regs.ex_af(),
                2 => {
                    self.contend_ir(bus, 1);
                    self.regs.b = self.regs.b.wrapping_sub(1);
                    if self.regs.b == 0 {
                        self.skip_imm8(bus);
                    } else {
                        self.jr(bus);
                    }
                }
                3 => self.jr(bus),
                _ => {
                    if self.condition(y - 4) {
                        self.jr(bus);
                    } else {
                        self.skip_imm8(bus);
                    }
                }
            },

            (0, 1) => {
                if q == 0 {
                    let nn = self.imm16(bus);
                    self.set_rp(p, idx, nn);
                } else {
                    self.contend_ir(bus, 7);
                    let target = self.index_reg(idx);
                    let (value, flags) = alu::add16(target, self.rp(p, idx));
                    self.regs.wz = target.wrapping_add(1);
                    self.set_index_reg(idx, value);
                    self.set_f((self.regs.f & (SF | ZF | PF)) | flags);
                }
            }

            (0, 2) => match (q, p) {
                (0, 0 | 1) => {
                    let addr = if p == 0 { self.regs.bc() } else { self.regs.de() };
                    let a = self.regs.a;
                    self.write(bus, addr, a);
                    self.regs.wz = (u16::from(a) << 8) | (addr.wrapping_add(1) & 0xFF);
                }
                (0, 2) => {
                    let nn = self.imm16(bus);
                    let value = self.index_reg(idx);
                    self.write16(bus, nn, value);
                    self.regs.wz = nn.wrapping_add(1);
                }
                (0, _) => {
                    let nn = self.imm16(bus);
                    let a = self.regs.a;
                    self.write(bus, nn, a);
                    self.regs.wz = (u16::from(a) << 8) | (nn.wrapping_add(1) & 0xFF);
                }
                (_, 0 | 1) => {
                    let addr = if p == 0 { self.regs.bc() } else { self.regs.de() };
                    self.regs.a = self.read(bus, addr);
                    self.regs.wz = addr.wrapping_add(1);
                }
                (_, 2) => {
                    let nn = self.imm16(bus);
                    let value = self.read16(bus, nn);
                    self.set_index_reg(idx, value);
                    self.regs.wz = nn.wrapping_add(1);
                }
                _ => {
                    let nn = self.imm16(bus);
                    self.regs.a = self.read(bus, nn);
                    self.regs.wz = nn.wrapping_add(1);
                }
            },

            (0, 3) => {
                self.contend_ir(bus, 2);
                let value = self.rp(p, idx);
                let value = if q == 0 {
                    value.wrapping_add(1)
                } else {
                    value.wrapping_sub(1)
                };
                self.set_rp(p, idx, value);
            }

            (0, 4 | 5) => {
                let step = |v: u8| if z == 4 { alu::inc8(v) } else { alu::dec8(v) };
                if y == 6 {
                    let addr = self.operand_addr(bus, idx);
                    let value = self.read(bus, addr);
                    self.contend(bus, addr, 1);
                    let r = step(value);
                    self.write(bus, addr, r.value);
                    self.set_f((self.regs.f & CF) | r.flags);
                } else {
                    let r = step(self.reg8(y, idx));
                    self.set_reg8(y, idx, r.value);
                    self.set_f((self.regs.f & CF) | r.flags);
                }
            }

            (0, 6) => {
                if y == 6 {
                    let addr = if idx == Index::Hl {
                        self.regs.hl()
                    } else {
                        let d = self.imm8(bus) as i8;
                        let addr = self.index_reg(idx).wrapping_add(d as u16);
                        self.regs.wz = addr;
                        addr
                    };
                    let n_addr = self.regs.pc;
                    let n = self.imm8(bus);
                    if idx != Index::Hl {
                        self.contend(bus, n_addr, 2);
                    }
                    self.write(bus, addr, n);
                } else {
                    let n = self.imm8(bus);
                    self.set_reg8(y, idx, n);
                }
            }

            (0, _) => self.accumulator_op(y),

            // =================================================================
            // x = 1: LD r,r' and HALT
            // =================================================================
            (1, _) => {
                if y == 6 && z == 6 {
                    self.regs.halted = true;
                } else if z == 6 {
                    let addr = self.operand_addr(bus, idx);
                    let value = self.read(bus, addr);
                    self.set_reg8(y, Index::Hl, value);
                } else if y == 6 {
                    let addr = self.operand_addr(bus, idx);
                    let value = self.reg8(z, Index::Hl);
                    self.write(bus, addr, value);
                } else {
                    let value = self.reg8(z, idx);
                    self.set_reg8(y, idx, value);
                }
            }

            // =================================================================
            // x = 2: ALU A,r
            // =================================================================
            (2, _) => {
                let operand = if z == 6 {
                    let addr = self.operand_addr(bus, idx);
                    self.read(bus, addr)
                } else {
                    self.reg8(z, idx)
                };
                self.alu_a(y, operand);
            }

            // =================================================================
            // x = 3
            // =================================================================
            (_, 0) => {
                self.contend_ir(bus, 1);
                if self.condition(y) {
                    self.ret(bus);
                }
            }

            (_, 1) => match (q, p) {
                (0, _) => {
                    let value = self.pop(bus);
                    self.set_rp2(p, idx, value);
                }
                (_, 0) => self.ret(bus),
                (_, 1) => self.regs.exx(),
                (_, 2) => self.regs.pc = self.index_reg(idx),
                _ => {
                    self.contend_ir(bus, 2);
                    self.regs.sp = self.index_reg(idx);
                }
            },

            (_, 2) => {
                let nn = self.imm16(bus);
                self.regs.wz = nn;
                if self.condition(y) {
                    self.regs.pc = nn;
                }
            }

            (_, 3) => match y {
                0 => {
                    let nn = self.imm16(bus);
                    self.regs.wz = nn;
                    self.regs.pc = nn;
                }
                2 => {
                    let n = self.imm8(bus);
                    let a = self.regs.a;
                    self.port_out(bus, u16::from_le_bytes([n, a]), a);
                    self.regs.wz = (u16::from(a) << 8) | u16::from(n.wrapping_add(1));
                }
                3 => {
                    let n = self.imm8(bus);
                    let port = u16::from_le_bytes([n, self.regs.a]);
                    self.regs.a = self.port_in(bus, port);
                    self.regs.wz = port.wrapping_add(1);
                }
                4 => {
                    let sp = self.regs.sp;
                    let value = self.read16(bus, sp);
                    self.contend(bus, sp.wrapping_add(1), 1);
                    let [lo, hi] = self.index_reg(idx).to_le_bytes();
                    self.write(bus, sp.wrapping_add(1), hi);
                    self.write(bus, sp, lo);
                    self.contend(bus, sp, 2);
                    self.set_index_reg(idx, value);
                    self.regs.wz = value;
                }
                5 => {
                    let de = self.regs.de();
                    self.regs.set_de(self.regs.hl());
                    self.regs.set_hl(de);
                }
                6 => {
                    self.regs.iff1 = false;
                    self.regs.iff2 = false;
                }
                7 => {
                    self.regs.iff1 = true;
                    self.regs.iff2 = true;
                    self.int_blocked = true;
                }
                // CB is dispatched before reaching here.
                _ => {}
            },

            (_, 4) => {
                let taken = self.condition(y);
                self.call(bus, taken);
            }

            (_, 5) => {
                if q == 0 {
                    self.contend_ir(bus, 1);
                    let value = self.rp2(p, idx);
                    self.push(bus, value);
                } else {
                    // p == 0: CALL nn. DD/ED/FD are dispatched earlier.
                    self.call(bus, true);
                }
            }

            (_, 6) => {
                let n = self.imm8(bus);
                self.alu_a(y, n);
            }

            _ => {
                self.contend_ir(bus, 1);
                self.push(bus, self.regs.pc);
                self.regs.pc = u16::from(y) * 8;
                self.regs.wz = self.regs.pc;
            }
        }
    }

    fn alu_a(&mut self, y: u8, operand: u8) {
        let r = alu::alu_op(y, self.regs.a, operand, self.regs.f & CF != 0);
        self.regs.a = r.value;
        self.regs.f = r.flags;
    }

    /// RLCA RRCA RLA RRA DAA CPL SCF CCF.
    fn accumulator_op(&mut self, y: u8) {
        let a = self.regs.a;
        let f = self.regs.f;
        let keep = f & (SF | ZF | PF);
        match y {
            0..=3 => {
                let r = alu::shift_op(y, a, f & CF != 0);
                self.regs.a = r.value;
                self.regs.f = keep | (r.value & (YF | XF)) | (r.flags & CF);
            }
            4 => {
                let r = alu::daa(a, f);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }
            5 => {
                self.regs.a = !a;
                self.regs.f = (f & (SF | ZF | PF | CF)) | HF | NF | (self.regs.a & (YF | XF));
            }
            6 => self.regs.f = keep | (a & (YF | XF)) | CF,
            _ => {
                let carry = f & CF != 0;
                self.regs.f = keep | (a & (YF | XF)) | if carry { HF } else { CF };
            }
        }
    }
}
