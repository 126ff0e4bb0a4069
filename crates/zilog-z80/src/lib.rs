//! Zilog Z80 core.
//!
//! The CPU executes whole instructions against an `emu_core::Memory`,
//! counting T-states exactly as the hardware spends them, including wait
//! states inserted by contended memory and internal cycles that put an
//! address on the bus. `Z80::run` stops at a cycle limit, an instruction
//! limit or a flagged cell, always on an instruction boundary.

mod alu;
mod bus;
mod cpu;
mod flags;
mod registers;

pub use bus::{AccessKind, Z80Bus};
pub use cpu::{ExitReason, Z80};
pub use flags::{CF, HF, NF, PF, SF, XF, YF, ZF};
pub use registers::Registers;
