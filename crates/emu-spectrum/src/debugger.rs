//! Debugger surface: breakpoints, access logging and register access.
//!
//! Breakpoints are cell flags, so they sit on the storage behind an address
//! at the time they are set. Page a different bank in and the breakpoint
//! goes with the old one.

use emu_core::{Access, CellFlags};
use zilog_z80::{ExitReason, Registers};

use crate::bus::AccessRecord;
use crate::scheduler::CONTENDED_MODE;
use crate::spectrum::Spectrum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakKind {
    Read,
    Write,
    Exec,
}

impl BreakKind {
    const fn flag(self) -> CellFlags {
        match self {
            Self::Read => CellFlags::BREAK_READ,
            Self::Write => CellFlags::BREAK_WRITE,
            Self::Exec => CellFlags::BREAK_EXEC,
        }
    }

    const fn access(self) -> Access {
        match self {
            Self::Write => Access::Write,
            Self::Read | Self::Exec => Access::Read,
        }
    }
}

impl Spectrum {
    pub fn set_breakpoint(&mut self, addr: u16, kind: BreakKind) {
        log::debug!("debugger: {kind:?} breakpoint at ${addr:04X}");
        self.bus
            .memory
            .cell_mut(addr, kind.access())
            .flags
            .insert(kind.flag());
    }

    pub fn clear_breakpoint(&mut self, addr: u16, kind: BreakKind) {
        self.bus
            .memory
            .cell_mut(addr, kind.access())
            .flags
            .remove(kind.flag());
    }

    #[must_use]
    pub fn has_breakpoint(&self, addr: u16, kind: BreakKind) -> bool {
        let cell = match kind.access() {
            Access::Read => self.bus.memory.read_cell(addr),
            Access::Write => self.bus.memory.write_cell(addr),
        };
        cell.has(kind.flag())
    }

    /// Log every access to the cells behind `addr`, both read and write.
    pub fn set_log_access(&mut self, addr: u16, enabled: bool) {
        for access in [Access::Read, Access::Write] {
            self.bus
                .memory
                .cell_mut(addr, access)
                .flags
                .set(CellFlags::LOG_ACCESS, enabled);
        }
    }

    pub fn take_access_log(&mut self) -> Vec<AccessRecord> {
        self.bus.take_access_log()
    }

    /// Break once SP rises above `sp`: "run until this routine returns".
    pub fn set_stack_breakpoint(&mut self, sp: Option<u16>) {
        self.cpu.set_stack_watch(sp);
    }

    #[must_use]
    pub fn registers(&self) -> Registers {
        *self.cpu.registers()
    }

    pub fn set_registers(&mut self, regs: Registers) {
        self.cpu.set_registers(regs);
    }

    /// Execute one instruction (or accept one interrupt) with every cell
    /// check enabled. A flyback it crosses happens on the next run.
    pub fn step(&mut self) -> ExitReason {
        let ic = self.cpu.instructions();
        self.cpu.run(&mut self.bus, i32::MAX, ic + 1, CONTENDED_MODE)
    }
}
