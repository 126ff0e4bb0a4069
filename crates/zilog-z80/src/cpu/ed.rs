//! ED page. Undefined ED opcodes are 8 T-state NOPs.

#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]

use crate::alu;
use crate::bus::Z80Bus;
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, parity, sz53, sz53p};

use super::{Index, Z80};

/// Direction and repeat of a block instruction.
#[derive(Clone, Copy)]
struct Block {
    step: u16,
    repeat: bool,
}

impl Z80 {
    pub(super) fn execute_ed<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) {
        let op = self.fetch_opcode(bus);
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        let q = y & 1;

        match x {
            1 => match z {
                0 => {
                    let bc = self.regs.bc();
                    let value = self.port_in(bus, bc);
                    self.regs.wz = bc.wrapping_add(1);
                    if y != 6 {
                        self.set_reg8(y, Index::Hl, value);
                    }
                    self.regs.f = (self.regs.f & CF) | sz53p(value);
                }
                1 => {
                    let bc = self.regs.bc();
                    let value = if y == 6 { 0 } else { self.reg8(y, Index::Hl) };
                    self.port_out(bus, bc, value);
                    self.regs.wz = bc.wrapping_add(1);
                }
                2 => {
                    self.contend_ir(bus, 7);
                    let hl = self.regs.hl();
                    let carry = self.regs.f & CF != 0;
                    let operand = self.rp(p, Index::Hl);
                    let (value, flags) = if q == 0 {
                        alu::sbc16(hl, operand, carry)
                    } else {
                        alu::adc16(hl, operand, carry)
                    };
                    self.regs.wz = hl.wrapping_add(1);
                    self.regs.set_hl(value);
                    self.regs.f = flags;
                }
                3 => {
                    let nn = self.imm16(bus);
                    if q == 0 {
                        let value = self.rp(p, Index::Hl);
                        self.write16(bus, nn, value);
                    } else {
                        let value = self.read16(bus, nn);
                        self.set_rp(p, Index::Hl, value);
                    }
                    self.regs.wz = nn.wrapping_add(1);
                }
                4 => {
                    let r = alu::sub8(0, self.regs.a, false);
                    self.regs.a = r.value;
                    self.regs.f = r.flags;
                }
                5 => {
                    // RETN and RETI both copy IFF2 back.
                    self.regs.iff1 = self.regs.iff2;
                    self.regs.pc = self.pop(bus);
                    self.regs.wz = self.regs.pc;
                }
                6 => self.regs.im = [0, 0, 1, 2][usize::from(y & 3)],
                _ => self.ed_misc(bus, y),
            },
            2 if z <= 3 && y >= 4 => {
                let block = Block {
                    step: if y & 1 == 0 { 1 } else { 0xFFFF },
                    repeat: y >= 6,
                };
                match z {
                    0 => self.block_ld(bus, block),
                    1 => self.block_cp(bus, block),
                    2 => self.block_in(bus, block),
                    _ => self.block_out(bus, block),
                }
            }
            _ => {}
        }
    }

    /// LD I,A  LD R,A  LD A,I  LD A,R  RRD  RLD, and two NOPs.
    fn ed_misc<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, y: u8) {
        match y {
            0 => {
                self.contend_ir(bus, 1);
                self.regs.i = self.regs.a;
            }
            1 => {
                self.contend_ir(bus, 1);
                self.regs.r = self.regs.a;
            }
            2 | 3 => {
                self.contend_ir(bus, 1);
                let value = if y == 2 { self.regs.i } else { self.regs.r };
                self.regs.a = value;
                let iff2 = if self.regs.iff2 { PF } else { 0 };
                self.regs.f = (self.regs.f & CF) | sz53(value) | iff2;
            }
            4 | 5 => {
                let hl = self.regs.hl();
                let mem = self.read(bus, hl);
                self.contend(bus, hl, 4);
                let a = self.regs.a;
                let (new_a, new_mem) = if y == 4 {
                    ((a & 0xF0) | (mem & 0x0F), (a << 4) | (mem >> 4))
                } else {
                    ((a & 0xF0) | (mem >> 4), (mem << 4) | (a & 0x0F))
                };
                self.write(bus, hl, new_mem);
                self.regs.a = new_a;
                self.regs.f = (self.regs.f & CF) | sz53p(new_a);
                self.regs.wz = hl.wrapping_add(1);
            }
            _ => {}
        }
    }

    /// Loop back over the two opcode bytes.
    fn repeat_block(&mut self) {
        self.regs.pc = self.regs.pc.wrapping_sub(2);
        self.regs.wz = self.regs.pc.wrapping_add(1);
    }

    fn block_ld<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, block: Block) {
        let hl = self.regs.hl();
        let de = self.regs.de();
        let value = self.read(bus, hl);
        self.write(bus, de, value);
        self.contend(bus, de, 2);
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let n = value.wrapping_add(self.regs.a);
        let mut f = (self.regs.f & (SF | ZF | CF)) | (n & XF);
        if n & 0x02 != 0 {
            f |= YF;
        }
        if bc != 0 {
            f |= PF;
        }
        self.regs.f = f;

        if block.repeat && bc != 0 {
            self.contend(bus, de, 5);
            self.repeat_block();
        }
        self.regs.set_hl(hl.wrapping_add(block.step));
        self.regs.set_de(de.wrapping_add(block.step));
    }

    fn block_cp<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, block: Block) {
        let hl = self.regs.hl();
        let value = self.read(bus, hl);
        self.contend(bus, hl, 5);
        let a = self.regs.a;
        let result = a.wrapping_sub(value);
        let half = (a & 0x0F) < (value & 0x0F);
        let n = result.wrapping_sub(u8::from(half));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let mut f = (self.regs.f & CF) | NF | (result & SF) | (n & XF);
        if result == 0 {
            f |= ZF;
        }
        if half {
            f |= HF;
        }
        if n & 0x02 != 0 {
            f |= YF;
        }
        if bc != 0 {
            f |= PF;
        }
        self.regs.f = f;
        self.regs.wz = self.regs.wz.wrapping_add(block.step);

        if block.repeat && bc != 0 && result != 0 {
            self.contend(bus, hl, 5);
            self.repeat_block();
        }
        self.regs.set_hl(hl.wrapping_add(block.step));
    }

    fn block_in<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, block: Block) {
        self.contend_ir(bus, 1);
        let bc = self.regs.bc();
        let value = self.port_in(bus, bc);
        let hl = self.regs.hl();
        self.write(bus, hl, value);
        self.regs.wz = bc.wrapping_add(block.step);
        self.regs.b = self.regs.b.wrapping_sub(1);

        let k = value.wrapping_add(self.regs.c.wrapping_add(block.step as u8));
        self.regs.f = self.io_block_flags(value, k);

        if block.repeat && self.regs.b != 0 {
            self.contend(bus, hl, 5);
            self.repeat_block();
        }
        self.regs.set_hl(hl.wrapping_add(block.step));
    }

    fn block_out<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, block: Block) {
        self.contend_ir(bus, 1);
        let hl = self.regs.hl();
        let value = self.read(bus, hl);
        self.regs.b = self.regs.b.wrapping_sub(1);
        let bc = self.regs.bc();
        self.port_out(bus, bc, value);
        self.regs.wz = bc.wrapping_add(block.step);
        let hl = hl.wrapping_add(block.step);
        self.regs.set_hl(hl);

        let k = value.wrapping_add(self.regs.l);
        self.regs.f = self.io_block_flags(value, k);

        if block.repeat && self.regs.b != 0 {
            self.contend(bus, bc, 5);
            self.repeat_block();
        }
    }

    /// Flags shared by INI/IND/OUTI/OUTD, from the transferred byte and the
    /// 8-bit sum `k`. B has already been decremented.
    fn io_block_flags(&self, value: u8, k: u8) -> u8 {
        let b = self.regs.b;
        let mut f = sz53(b);
        if value & 0x80 != 0 {
            f |= NF;
        }
        if k < value {
            f |= HF | CF;
        }
        if parity((k & 0x07) ^ b) {
            f |= PF;
        }
        f
    }
}
