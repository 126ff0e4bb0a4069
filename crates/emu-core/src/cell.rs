//! The addressable unit of emulated memory.
//!
//! A cell is one data byte plus the behaviour flags attached to the physical
//! storage location. Flags travel with the storage, not with the address: a
//! RAM bank keeps its contention and breakpoint flags no matter which page
//! slot currently maps it.

use bitflags::bitflags;

bitflags! {
    /// Behaviour flags of a memory cell.
    ///
    /// The same set doubles as the CPU's run mode: a flag class that is not
    /// part of the mode passed to `run()` is never checked.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CellFlags: u16 {
        /// Contended memory: accesses pay wait cycles from the page's wait table.
        const WAIT = 1 << 0;
        /// Stop after the instruction that reads this cell.
        const BREAK_READ = 1 << 1;
        /// Stop after the instruction that writes this cell.
        const BREAK_WRITE = 1 << 2;
        /// Stop before executing an instruction starting at this cell.
        const BREAK_EXEC = 1 << 3;
        /// Offer the opcode fetched from this cell to the peripherals first.
        const PATCH_ON_EXEC = 1 << 4;
        /// Reads are answered by a peripheral instead of the stored byte.
        const MMIO_READ = 1 << 5;
        /// Writes are delivered to a peripheral instead of being stored.
        const MMIO_WRITE = 1 << 6;
        /// Video memory being scanned: flush the display before the write lands.
        const VIDEO_TRACK = 1 << 7;
        /// Report every access to the debugger log.
        const LOG_ACCESS = 1 << 8;

        /// All breakpoint classes.
        const BREAKPOINTS = Self::BREAK_READ.bits()
            | Self::BREAK_WRITE.bits()
            | Self::BREAK_EXEC.bits();
    }
}

/// One byte of emulated storage and its behaviour flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cell {
    pub data: u8,
    pub flags: CellFlags,
}

impl Cell {
    /// A cell holding `data` with no flags.
    #[must_use]
    pub const fn new(data: u8) -> Self {
        Self {
            data,
            flags: CellFlags::empty(),
        }
    }

    /// A cell holding `data` with the given flags.
    #[must_use]
    pub const fn with_flags(data: u8, flags: CellFlags) -> Self {
        Self { data, flags }
    }

    /// True if any of `flags` is set on this cell.
    #[must_use]
    pub const fn has(&self, flags: CellFlags) -> bool {
        self.flags.intersects(flags)
    }
}
