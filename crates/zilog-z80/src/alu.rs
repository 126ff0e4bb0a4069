//! Arithmetic and logic with Z80 flag semantics.

#![allow(clippy::cast_possible_truncation)] // Low byte extraction.

use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, sz53, sz53p};

/// Result byte and the complete new F register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluResult {
    pub value: u8,
    pub flags: u8,
}

const fn res(value: u8, flags: u8) -> AluResult {
    AluResult { value, flags }
}

#[must_use]
pub fn add8(a: u8, b: u8, carry: bool) -> AluResult {
    let c = u8::from(carry);
    let wide = u16::from(a) + u16::from(b) + u16::from(c);
    let value = wide as u8;
    let mut flags = sz53(value);
    if (a & 0x0F) + (b & 0x0F) + c > 0x0F {
        flags |= HF;
    }
    if (a ^ b) & 0x80 == 0 && (a ^ value) & 0x80 != 0 {
        flags |= PF;
    }
    if wide > 0xFF {
        flags |= CF;
    }
    res(value, flags)
}

#[must_use]
pub fn sub8(a: u8, b: u8, carry: bool) -> AluResult {
    let c = u8::from(carry);
    let value = a.wrapping_sub(b).wrapping_sub(c);
    let mut flags = sz53(value) | NF;
    if (a & 0x0F) < (b & 0x0F) + c {
        flags |= HF;
    }
    if (a ^ b) & 0x80 != 0 && (b ^ value) & 0x80 == 0 {
        flags |= PF;
    }
    if u16::from(a) < u16::from(b) + u16::from(c) {
        flags |= CF;
    }
    res(value, flags)
}

/// `CP`: flags of `a - b`, with X/Y taken from the operand.
#[must_use]
pub fn cp8(a: u8, b: u8) -> AluResult {
    let r = sub8(a, b, false);
    res(a, (r.flags & !(YF | XF)) | (b & (YF | XF)))
}

#[must_use]
pub fn and8(a: u8, b: u8) -> AluResult {
    let value = a & b;
    res(value, sz53p(value) | HF)
}

#[must_use]
pub fn or8(a: u8, b: u8) -> AluResult {
    let value = a | b;
    res(value, sz53p(value))
}

#[must_use]
pub fn xor8(a: u8, b: u8) -> AluResult {
    let value = a ^ b;
    res(value, sz53p(value))
}

/// Operation selected by bits 3-5 of the `ALU A,r` opcode group.
#[must_use]
pub fn alu_op(op: u8, a: u8, b: u8, carry: bool) -> AluResult {
    match op & 7 {
        0 => add8(a, b, false),
        1 => add8(a, b, carry),
        2 => sub8(a, b, false),
        3 => sub8(a, b, carry),
        4 => and8(a, b),
        5 => xor8(a, b),
        6 => or8(a, b),
        _ => cp8(a, b),
    }
}

/// `INC r`: carry is the caller's to preserve.
#[must_use]
pub fn inc8(a: u8) -> AluResult {
    let value = a.wrapping_add(1);
    let mut flags = sz53(value);
    if a & 0x0F == 0x0F {
        flags |= HF;
    }
    if a == 0x7F {
        flags |= PF;
    }
    res(value, flags)
}

/// `DEC r`: carry is the caller's to preserve.
#[must_use]
pub fn dec8(a: u8) -> AluResult {
    let value = a.wrapping_sub(1);
    let mut flags = sz53(value) | NF;
    if a & 0x0F == 0 {
        flags |= HF;
    }
    if a == 0x80 {
        flags |= PF;
    }
    res(value, flags)
}

/// CB-page rotate/shift selected by bits 3-5: RLC RRC RL RR SLA SRA SLL SRL.
#[must_use]
pub fn shift_op(op: u8, v: u8, carry: bool) -> AluResult {
    let (value, out) = match op & 7 {
        0 => (v.rotate_left(1), v >> 7),
        1 => (v.rotate_right(1), v & 1),
        2 => ((v << 1) | u8::from(carry), v >> 7),
        3 => ((v >> 1) | (u8::from(carry) << 7), v & 1),
        4 => (v << 1, v >> 7),
        5 => ((v >> 1) | (v & 0x80), v & 1),
        6 => ((v << 1) | 1, v >> 7),
        _ => (v >> 1, v & 1),
    };
    res(value, sz53p(value) | if out != 0 { CF } else { 0 })
}

/// `BIT n,v`. X/Y come from `xy_source` (the operand, or MEMPTR high byte
/// for the memory forms).
#[must_use]
pub fn bit(n: u8, v: u8, old_flags: u8, xy_source: u8) -> u8 {
    let tested = v & (1 << n);
    let mut flags = (old_flags & CF) | HF | (xy_source & (YF | XF));
    if tested == 0 {
        flags |= ZF | PF;
    }
    if n == 7 && tested != 0 {
        flags |= SF;
    }
    flags
}

/// `ADD HL,rr`: S, Z and P/V are the caller's to preserve.
#[must_use]
pub fn add16(a: u16, b: u16) -> (u16, u8) {
    let wide = u32::from(a) + u32::from(b);
    let value = wide as u16;
    let mut flags = ((value >> 8) as u8) & (YF | XF);
    if (a & 0x0FFF) + (b & 0x0FFF) > 0x0FFF {
        flags |= HF;
    }
    if wide > 0xFFFF {
        flags |= CF;
    }
    (value, flags)
}

#[must_use]
pub fn adc16(a: u16, b: u16, carry: bool) -> (u16, u8) {
    let c = u16::from(carry);
    let wide = u32::from(a) + u32::from(b) + u32::from(c);
    let value = wide as u16;
    let mut flags = ((value >> 8) as u8) & (SF | YF | XF);
    if value == 0 {
        flags |= ZF;
    }
    if (a & 0x0FFF) + (b & 0x0FFF) + c > 0x0FFF {
        flags |= HF;
    }
    if (a ^ b) & 0x8000 == 0 && (a ^ value) & 0x8000 != 0 {
        flags |= PF;
    }
    if wide > 0xFFFF {
        flags |= CF;
    }
    (value, flags)
}

#[must_use]
pub fn sbc16(a: u16, b: u16, carry: bool) -> (u16, u8) {
    let c = u16::from(carry);
    let value = a.wrapping_sub(b).wrapping_sub(c);
    let mut flags = NF | (((value >> 8) as u8) & (SF | YF | XF));
    if value == 0 {
        flags |= ZF;
    }
    if (a & 0x0FFF) < (b & 0x0FFF) + c {
        flags |= HF;
    }
    if (a ^ b) & 0x8000 != 0 && (b ^ value) & 0x8000 == 0 {
        flags |= PF;
    }
    if u32::from(a) < u32::from(b) + u32::from(c) {
        flags |= CF;
    }
    (value, flags)
}

/// `DAA` on A with the current flags.
#[must_use]
pub fn daa(a: u8, flags: u8) -> AluResult {
    let subtract = flags & NF != 0;
    let half = flags & HF != 0;
    let mut carry = flags & CF != 0;
    let mut correction = 0u8;
    if half || a & 0x0F > 9 {
        correction |= 0x06;
    }
    if carry || a > 0x99 {
        correction |= 0x60;
        carry = true;
    }
    let value = if subtract {
        a.wrapping_sub(correction)
    } else {
        a.wrapping_add(correction)
    };
    let new_half = if subtract {
        half && a & 0x0F < 6
    } else {
        a & 0x0F > 9
    };
    let mut f = sz53p(value) | (flags & NF);
    if carry {
        f |= CF;
    }
    if new_half {
        f |= HF;
    }
    res(value, f)
}
