//! Z80 execution loop and bus cycles.
//!
//! Timing follows the per-M-cycle breakdown used by the well-known
//! contention tables: every memory read, write, opcode fetch and internal
//! cycle is charged against the address the CPU drives at that moment, so a
//! page's wait table sees each access at its true starting cycle.

#![allow(clippy::cast_possible_truncation)] // Byte halves of words.
#![allow(clippy::cast_possible_wrap)] // Relative jumps.
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::struct_excessive_bools)]

mod cb;
mod ed;
mod execute;

use std::fmt;

use emu_core::{CellFlags, Observable, Value};

use crate::bus::{AccessKind, Z80Bus};
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF};
use crate::registers::Registers;

/// Why `Z80::run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    CycleLimitReached,
    /// Used to cut replay frames at an exact instruction.
    InstructionLimitReached,
    /// The last instruction read a `BREAK_READ` cell at this address.
    ReadBreakpoint(u16),
    /// The last instruction wrote a `BREAK_WRITE` cell at this address.
    WriteBreakpoint(u16),
    /// The next instruction starts at this `BREAK_EXEC` address. It has not
    /// run; resuming executes it.
    ExecBreakpoint(u16),
    /// SP rose above the armed stack watch; carries the new SP.
    StackBreakpoint(u16),
    /// The bus asked to stop after the last instruction.
    Stopped,
}

impl ExitReason {
    /// True for breakpoint exits, false for limits and bus stops.
    #[must_use]
    pub const fn is_breakpoint(self) -> bool {
        !matches!(
            self,
            Self::CycleLimitReached | Self::InstructionLimitReached | Self::Stopped
        )
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleLimitReached => f.write_str("cycle limit"),
            Self::InstructionLimitReached => f.write_str("instruction limit"),
            Self::ReadBreakpoint(addr) => write!(f, "read breakpoint at ${addr:04X}"),
            Self::WriteBreakpoint(addr) => write!(f, "write breakpoint at ${addr:04X}"),
            Self::ExecBreakpoint(addr) => write!(f, "exec breakpoint at ${addr:04X}"),
            Self::StackBreakpoint(sp) => write!(f, "stack breakpoint, SP=${sp:04X}"),
            Self::Stopped => f.write_str("stopped by bus"),
        }
    }
}

/// Register substituted for HL by a DD/FD prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Index {
    Hl,
    Ix,
    Iy,
}

/// Z80 CPU.
///
/// The CPU owns its registers and counters; memory and ports belong to the
/// `Z80Bus` passed to `run`. The cycle counter is signed so the scheduler
/// can rebase it by a frame length without special cases.
#[derive(Debug, Clone)]
pub struct Z80 {
    pub(crate) regs: Registers,
    /// T-states since the current frame's epoch.
    cc: i32,
    /// Instructions executed since power-on.
    ic: u64,
    /// INT is asserted while `cc < int_until`.
    int_until: i32,
    nmi_pending: bool,
    /// Suppress interrupt acceptance at the next boundary (after EI or a
    /// prefix byte).
    int_blocked: bool,
    /// Flag classes checked during the current `run`.
    mode: CellFlags,
    /// First breakpoint hit during the current instruction.
    pending_break: Option<ExitReason>,
    /// Exec breakpoint already reported at this address; run it on resume.
    skip_exec_break_at: Option<u16>,
    stack_watch: Option<u16>,
}

impl Z80 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::power_on(),
            cc: 0,
            ic: 0,
            int_until: 0,
            nmi_pending: false,
            int_blocked: false,
            mode: CellFlags::all(),
            pending_break: None,
            skip_exec_break_at: None,
            stack_watch: None,
        }
    }

    /// /RESET: PC, I, R, interrupt state cleared. Counters are untouched.
    pub fn reset(&mut self) {
        self.regs.pc = 0;
        self.regs.i = 0;
        self.regs.r = 0;
        self.regs.iff1 = false;
        self.regs.iff2 = false;
        self.regs.im = 0;
        self.regs.halted = false;
        self.nmi_pending = false;
        self.int_blocked = false;
        self.pending_break = None;
        self.skip_exec_break_at = None;
    }

    #[must_use]
    pub const fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn set_registers(&mut self, regs: Registers) {
        self.regs = regs;
        self.skip_exec_break_at = None;
    }

    #[must_use]
    pub const fn pc(&self) -> u16 {
        self.regs.pc
    }

    #[must_use]
    pub const fn cc(&self) -> i32 {
        self.cc
    }

    pub fn set_cc(&mut self, cc: i32) {
        self.cc = cc;
    }

    /// Move the cycle epoch forward by `cycles`.
    pub fn rebase(&mut self, cycles: i32) {
        self.cc -= cycles;
        self.int_until -= cycles;
    }

    #[must_use]
    pub const fn instructions(&self) -> u64 {
        self.ic
    }

    pub fn set_instructions(&mut self, ic: u64) {
        self.ic = ic;
    }

    /// Assert INT until cycle `until` (exclusive).
    pub fn assert_int(&mut self, until: i32) {
        self.int_until = until;
    }

    #[must_use]
    pub const fn int_until(&self) -> i32 {
        self.int_until
    }

    pub fn trigger_nmi(&mut self) {
        self.nmi_pending = true;
    }

    /// Arm (or disarm) the stack watch. `run` exits with `StackBreakpoint`
    /// after the first instruction that leaves SP above `watch`.
    pub fn set_stack_watch(&mut self, watch: Option<u16>) {
        self.stack_watch = watch;
    }

    #[must_use]
    pub const fn stack_watch(&self) -> Option<u16> {
        self.stack_watch
    }

    /// Execute until `cc >= cc_limit`, `ic >= ic_limit`, or a breakpoint.
    ///
    /// Only the cell flag classes in `mode` are examined. Leaving `WAIT` out
    /// is valid only where the caller knows no contended access can cost
    /// anything.
    pub fn run<B: Z80Bus + ?Sized>(
        &mut self,
        bus: &mut B,
        cc_limit: i32,
        ic_limit: u64,
        mode: CellFlags,
    ) -> ExitReason {
        self.mode = mode;
        loop {
            if self.cc >= cc_limit {
                return ExitReason::CycleLimitReached;
            }
            if self.ic >= ic_limit {
                return ExitReason::InstructionLimitReached;
            }

            if self.nmi_pending {
                self.nmi_pending = false;
                self.accept_nmi(bus);
                if let Some(reason) = self.pending_break.take() {
                    return reason;
                }
                continue;
            }
            if self.regs.iff1 && !self.int_blocked && self.cc < self.int_until {
                self.accept_int(bus);
                if let Some(reason) = self.pending_break.take() {
                    return reason;
                }
                continue;
            }

            let skip = self.skip_exec_break_at.take();
            if self.mode.contains(CellFlags::BREAK_EXEC) && !self.regs.halted {
                let pc = self.regs.pc;
                if skip != Some(pc) && bus.memory().read_cell(pc).has(CellFlags::BREAK_EXEC) {
                    self.skip_exec_break_at = Some(pc);
                    log::debug!("z80: exec breakpoint at ${pc:04X}");
                    return ExitReason::ExecBreakpoint(pc);
                }
            }

            self.int_blocked = false;
            if self.regs.halted {
                self.halt_cycle(bus);
            } else {
                self.execute(bus);
            }
            self.ic += 1;

            if let Some(reason) = self.pending_break.take() {
                log::debug!("z80: {reason}");
                return reason;
            }
            if let Some(watch) = self.stack_watch {
                if self.regs.sp > watch {
                    self.stack_watch = None;
                    return ExitReason::StackBreakpoint(self.regs.sp);
                }
            }
            if bus.stop_requested() {
                return ExitReason::Stopped;
            }
        }
    }

    // =========================================================================
    // Bus cycles
    // =========================================================================

    fn note_break(&mut self, reason: ExitReason) {
        if self.pending_break.is_none() {
            self.pending_break = Some(reason);
        }
    }

    #[inline]
    fn wait<B: Z80Bus + ?Sized>(&mut self, bus: &B, addr: u16, hits: CellFlags) {
        if hits.contains(CellFlags::WAIT) {
            self.cc += bus.memory().wait_cycles(addr, self.cc);
        }
    }

    /// M1 cycle at PC: 4 T-states, bumps R.
    pub(crate) fn fetch_opcode<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) -> u8 {
        let pc = self.regs.pc;
        let cell = bus.memory().read_cell(pc);
        let hits = cell.flags & self.mode;
        self.regs.inc_r();
        self.regs.pc = pc.wrapping_add(1);
        if hits.is_empty() {
            self.cc += 4;
            return cell.data;
        }

        self.wait(bus, pc, hits);
        let mut opcode = cell.data;
        if hits.contains(CellFlags::MMIO_READ) {
            opcode = bus.mmio_read(self.cc, pc);
        }
        if hits.contains(CellFlags::PATCH_ON_EXEC) {
            opcode = bus.patch_opcode(self.cc, &mut self.regs, pc, opcode);
        }
        if hits.contains(CellFlags::LOG_ACCESS) {
            bus.log_access(self.cc, pc, AccessKind::Fetch, opcode);
        }
        self.cc += 4;
        opcode
    }

    /// Memory read: 3 T-states.
    pub(crate) fn read<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, addr: u16) -> u8 {
        let cell = bus.memory().read_cell(addr);
        let hits = cell.flags & self.mode;
        if hits.is_empty() {
            self.cc += 3;
            return cell.data;
        }

        self.wait(bus, addr, hits);
        let mut value = cell.data;
        if hits.contains(CellFlags::MMIO_READ) {
            value = bus.mmio_read(self.cc, addr);
        }
        if hits.contains(CellFlags::BREAK_READ) {
            self.note_break(ExitReason::ReadBreakpoint(addr));
        }
        if hits.contains(CellFlags::LOG_ACCESS) {
            bus.log_access(self.cc, addr, AccessKind::Read, value);
        }
        self.cc += 3;
        value
    }

    /// Memory write: 3 T-states. The shadow target, if any, gets the same
    /// byte with its own flags honoured.
    pub(crate) fn write<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, addr: u16, value: u8) {
        let memory = bus.memory();
        let hits = memory.write_cell(addr).flags & self.mode;
        let shadow_hits = memory.shadow_cell(addr).map(|c| c.flags & self.mode);
        if hits.is_empty() && shadow_hits.is_none() {
            self.cc += 3;
            bus.memory_mut().store(addr, value);
            return;
        }

        self.wait(bus, addr, hits);
        if hits.contains(CellFlags::VIDEO_TRACK) {
            bus.video_flush(self.cc, addr);
        }
        if hits.contains(CellFlags::MMIO_WRITE) {
            bus.mmio_write(self.cc, addr, value);
        } else {
            bus.memory_mut().store(addr, value);
        }
        if hits.contains(CellFlags::BREAK_WRITE) {
            self.note_break(ExitReason::WriteBreakpoint(addr));
        }
        if hits.contains(CellFlags::LOG_ACCESS) {
            bus.log_access(self.cc, addr, AccessKind::Write, value);
        }

        if let Some(shadow) = shadow_hits {
            if shadow.contains(CellFlags::VIDEO_TRACK) {
                bus.video_flush(self.cc, addr);
            }
            if shadow.contains(CellFlags::MMIO_WRITE) {
                bus.mmio_write(self.cc, addr, value);
            } else {
                bus.memory_mut().store_shadow(addr, value);
            }
        }
        self.cc += 3;
    }

    /// `n` internal T-states with `addr` on the address bus.
    pub(crate) fn contend<B: Z80Bus + ?Sized>(&mut self, bus: &B, addr: u16, n: i32) {
        let hits = bus.memory().read_cell(addr).flags & self.mode;
        if hits.contains(CellFlags::WAIT) {
            for _ in 0..n {
                self.cc += bus.memory().wait_cycles(addr, self.cc) + 1;
            }
        } else {
            self.cc += n;
        }
    }

    pub(crate) fn contend_ir<B: Z80Bus + ?Sized>(&mut self, bus: &B, n: i32) {
        self.contend(bus, self.regs.ir(), n);
    }

    pub(crate) fn imm8<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) -> u8 {
        let value = self.read(bus, self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    pub(crate) fn imm16<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) -> u16 {
        let lo = self.imm8(bus);
        let hi = self.imm8(bus);
        u16::from_le_bytes([lo, hi])
    }

    pub(crate) fn read16<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, addr: u16) -> u16 {
        let lo = self.read(bus, addr);
        let hi = self.read(bus, addr.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    pub(crate) fn write16<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, addr: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write(bus, addr, lo);
        self.write(bus, addr.wrapping_add(1), hi);
    }

    pub(crate) fn push<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write(bus, self.regs.sp, hi);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write(bus, self.regs.sp, lo);
    }

    pub(crate) fn pop<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) -> u16 {
        let lo = self.read(bus, self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = self.read(bus, self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        u16::from_le_bytes([lo, hi])
    }

    pub(crate) fn port_in<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, port: u16) -> u8 {
        let (value, done) = bus.input(self.cc, port);
        self.cc = done;
        value
    }

    pub(crate) fn port_out<B: Z80Bus + ?Sized>(&mut self, bus: &mut B, port: u16, value: u8) {
        self.cc = bus.output(self.cc, port, value);
    }

    // =========================================================================
    // Interrupts and HALT
    // =========================================================================

    /// One NOP-like M1 cycle while halted. PC stays past the HALT.
    fn halt_cycle<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) {
        let pc = self.regs.pc;
        self.regs.inc_r();
        self.contend(bus, pc, 4);
    }

    fn accept_nmi<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) {
        self.regs.halted = false;
        self.regs.iff1 = false;
        self.regs.inc_r();
        self.cc += 5;
        self.push(bus, self.regs.pc);
        self.regs.pc = 0x0066;
        self.regs.wz = 0x0066;
    }

    /// Maskable interrupt: 13 T-states in IM 0/1, 19 in IM 2.
    fn accept_int<B: Z80Bus + ?Sized>(&mut self, bus: &mut B) {
        self.regs.halted = false;
        self.regs.iff1 = false;
        self.regs.iff2 = false;
        self.regs.inc_r();
        let vector = bus.irq_vector();
        self.cc += 7;
        self.push(bus, self.regs.pc);
        let target = match self.regs.im {
            2 => {
                let table = u16::from_le_bytes([vector, self.regs.i]);
                self.read16(bus, table)
            }
            // IM 0 only supports RST on the data bus; anything else is
            // treated as the usual floating $FF (RST 38).
            0 if vector & 0xC7 == 0xC7 => u16::from(vector & 0x38),
            _ => 0x0038,
        };
        self.regs.pc = target;
        self.regs.wz = target;
    }

    // =========================================================================
    // Register decoding
    // =========================================================================

    pub(crate) fn index_reg(&self, idx: Index) -> u16 {
        match idx {
            Index::Hl => self.regs.hl(),
            Index::Ix => self.regs.ix,
            Index::Iy => self.regs.iy,
        }
    }

    pub(crate) fn set_index_reg(&mut self, idx: Index, value: u16) {
        match idx {
            Index::Hl => self.regs.set_hl(value),
            Index::Ix => self.regs.ix = value,
            Index::Iy => self.regs.iy = value,
        }
    }

    /// 8-bit register by opcode field (`6` is not a register). With an
    /// index prefix, H and L become the index halves.
    pub(crate) fn reg8(&self, r: u8, idx: Index) -> u8 {
        match r & 7 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => (self.index_reg(idx) >> 8) as u8,
            5 => self.index_reg(idx) as u8,
            _ => self.regs.a,
        }
    }

    pub(crate) fn set_reg8(&mut self, r: u8, idx: Index, value: u8) {
        match r & 7 {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => {
                let v = self.index_reg(idx);
                self.set_index_reg(idx, (v & 0x00FF) | (u16::from(value) << 8));
            }
            5 => {
                let v = self.index_reg(idx);
                self.set_index_reg(idx, (v & 0xFF00) | u16::from(value));
            }
            _ => self.regs.a = value,
        }
    }

    /// BC, DE, HL/IX/IY, SP.
    pub(crate) fn rp(&self, p: u8, idx: Index) -> u16 {
        match p & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.index_reg(idx),
            _ => self.regs.sp,
        }
    }

    pub(crate) fn set_rp(&mut self, p: u8, idx: Index, value: u16) {
        match p & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.set_index_reg(idx, value),
            _ => self.regs.sp = value,
        }
    }

    /// BC, DE, HL/IX/IY, AF (PUSH/POP).
    pub(crate) fn rp2(&self, p: u8, idx: Index) -> u16 {
        if p & 3 == 3 {
            self.regs.af()
        } else {
            self.rp(p, idx)
        }
    }

    pub(crate) fn set_rp2(&mut self, p: u8, idx: Index, value: u16) {
        if p & 3 == 3 {
            self.regs.set_af(value);
        } else {
            self.set_rp(p, idx, value);
        }
    }

    /// NZ Z NC C PO PE P M.
    pub(crate) fn condition(&self, y: u8) -> bool {
        let f = self.regs.f;
        match y & 7 {
            0 => f & ZF == 0,
            1 => f & ZF != 0,
            2 => f & CF == 0,
            3 => f & CF != 0,
            4 => f & PF == 0,
            5 => f & PF != 0,
            6 => f & SF == 0,
            _ => f & SF != 0,
        }
    }
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}

const Z80_QUERY_PATHS: &[&str] = &[
    "a", "f", "b", "c", "d", "e", "h", "l", "af", "bc", "de", "hl", "af'", "bc'", "de'", "hl'",
    "ix", "iy", "sp", "pc", "i", "r", "wz", "iff1", "iff2", "im", "halted", "flags.s",
    "flags.z", "flags.y", "flags.h", "flags.x", "flags.p", "flags.n", "flags.c", "cc", "ic",
    "int_until",
];

impl Observable for Z80 {
    fn query(&self, path: &str) -> Option<Value> {
        let r = &self.regs;
        let alt = |hi: u8, lo: u8| Value::from(u16::from_le_bytes([lo, hi]));
        let flag = |bit: u8| Value::from(r.f & bit != 0);
        Some(match path {
            "a" => r.a.into(),
            "f" => r.f.into(),
            "b" => r.b.into(),
            "c" => r.c.into(),
            "d" => r.d.into(),
            "e" => r.e.into(),
            "h" => r.h.into(),
            "l" => r.l.into(),
            "af" => r.af().into(),
            "bc" => r.bc().into(),
            "de" => r.de().into(),
            "hl" => r.hl().into(),
            "af'" => alt(r.a_alt, r.f_alt),
            "bc'" => alt(r.b_alt, r.c_alt),
            "de'" => alt(r.d_alt, r.e_alt),
            "hl'" => alt(r.h_alt, r.l_alt),
            "ix" => r.ix.into(),
            "iy" => r.iy.into(),
            "sp" => r.sp.into(),
            "pc" => r.pc.into(),
            "i" => r.i.into(),
            "r" => r.r.into(),
            "wz" => r.wz.into(),
            "iff1" => r.iff1.into(),
            "iff2" => r.iff2.into(),
            "im" => r.im.into(),
            "halted" => r.halted.into(),
            "flags.s" => flag(SF),
            "flags.z" => flag(ZF),
            "flags.y" => flag(YF),
            "flags.h" => flag(HF),
            "flags.x" => flag(XF),
            "flags.p" => flag(PF),
            "flags.n" => flag(NF),
            "flags.c" => flag(CF),
            "cc" => self.cc.into(),
            "ic" => self.ic.into(),
            "int_until" => self.int_until.into(),
            _ => return None,
        })
    }

    fn query_paths(&self) -> &'static [&'static str] {
        Z80_QUERY_PATHS
    }
}
