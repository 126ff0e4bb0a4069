//! What the CPU needs from the machine around it.

use emu_core::Memory;

use crate::registers::Registers;

/// Kind of memory access reported for `LOG_ACCESS` cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Fetch,
    Read,
    Write,
}

/// Host side of the CPU: memory, ports and the cell-flag callbacks.
///
/// Memory is reached only through `memory`/`memory_mut`, so a peripheral
/// that remaps pages during a callback is seen by the very next access.
pub trait Z80Bus {
    fn memory(&self) -> &Memory;

    fn memory_mut(&mut self) -> &mut Memory;

    /// Resolve `IN` from `port`, starting the I/O cycle at `cc`. Returns the
    /// byte and the cycle at which the access completes.
    fn input(&mut self, cc: i32, port: u16) -> (u8, i32);

    /// Deliver `OUT` to `port`, starting at `cc`. Returns the cycle at which
    /// the access completes.
    fn output(&mut self, cc: i32, port: u16, value: u8) -> i32;

    /// An opcode was fetched from a `PATCH_ON_EXEC` cell. The returned
    /// opcode executes instead; `regs` may be changed to emulate a routine.
    fn patch_opcode(&mut self, _cc: i32, _regs: &mut Registers, _pc: u16, opcode: u8) -> u8 {
        opcode
    }

    /// Read of an `MMIO_READ` cell.
    fn mmio_read(&mut self, _cc: i32, addr: u16) -> u8 {
        self.memory().peek(addr)
    }

    /// Write to an `MMIO_WRITE` cell. The byte is not stored by the CPU.
    fn mmio_write(&mut self, _cc: i32, _addr: u16, _value: u8) {}

    /// A write to a `VIDEO_TRACK` cell is about to land at `cc`.
    fn video_flush(&mut self, _cc: i32, _addr: u16) {}

    /// An access touched a `LOG_ACCESS` cell.
    fn log_access(&mut self, _cc: i32, _addr: u16, _kind: AccessKind, _value: u8) {}

    /// Checked after every instruction; `true` ends `run` with
    /// `ExitReason::Stopped`.
    fn stop_requested(&self) -> bool {
        false
    }

    /// Byte on the data bus during an interrupt acknowledge.
    fn irq_vector(&mut self) -> u8 {
        0xFF
    }
}
