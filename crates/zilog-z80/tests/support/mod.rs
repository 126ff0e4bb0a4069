//! Flat 64K RAM test machine.

#![allow(dead_code)]

use emu_core::{BlockId, CellFlags, Memory, Source};
use zilog_z80::{AccessKind, Registers, Z80, Z80Bus};

pub struct TestBus {
    pub memory: Memory,
    pub ram: BlockId,
    pub in_value: u8,
    pub port_reads: Vec<u16>,
    pub port_writes: Vec<(u16, u8)>,
    /// Opcode handed back for `PATCH_ON_EXEC` cells, if set.
    pub patch_with: Option<u8>,
    pub patched: Vec<u16>,
    pub mmio_writes: Vec<(u16, u8)>,
    pub flushes: Vec<(i32, u16)>,
    pub logged: Vec<(u16, AccessKind)>,
    pub vector: u8,
}

impl TestBus {
    pub fn new() -> Self {
        let mut memory = Memory::new();
        let ram = memory.add_block("ram", 0x1_0000, 0);
        let _ = memory.map(
            0x0000,
            0x1_0000,
            Source::block(ram, 0),
            Source::block(ram, 0),
            None,
            None,
        );
        Self {
            memory,
            ram,
            in_value: 0xFF,
            port_reads: Vec::new(),
            port_writes: Vec::new(),
            patch_with: None,
            patched: Vec::new(),
            mmio_writes: Vec::new(),
            flushes: Vec::new(),
            logged: Vec::new(),
            vector: 0xFF,
        }
    }

    pub fn load(&mut self, addr: u16, bytes: &[u8]) {
        self.memory.poke_slice(addr, bytes);
    }

    pub fn flag(&mut self, addr: u16, len: usize, flags: CellFlags) {
        self.memory
            .block_mut(self.ram)
            .set_flags(usize::from(addr), len, flags);
    }
}

impl Z80Bus for TestBus {
    fn memory(&self) -> &Memory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    fn input(&mut self, cc: i32, port: u16) -> (u8, i32) {
        self.port_reads.push(port);
        (self.in_value, cc + 4)
    }

    fn output(&mut self, cc: i32, port: u16, value: u8) -> i32 {
        self.port_writes.push((port, value));
        cc + 4
    }

    fn patch_opcode(&mut self, _cc: i32, _regs: &mut Registers, pc: u16, opcode: u8) -> u8 {
        self.patched.push(pc);
        self.patch_with.unwrap_or(opcode)
    }

    fn mmio_read(&mut self, _cc: i32, addr: u16) -> u8 {
        (addr & 0xFF) as u8 ^ 0xA5
    }

    fn mmio_write(&mut self, _cc: i32, addr: u16, value: u8) {
        self.mmio_writes.push((addr, value));
    }

    fn video_flush(&mut self, cc: i32, addr: u16) {
        self.flushes.push((cc, addr));
    }

    fn log_access(&mut self, _cc: i32, addr: u16, kind: AccessKind, _value: u8) {
        self.logged.push((addr, kind));
    }

    fn irq_vector(&mut self) -> u8 {
        self.vector
    }
}

/// CPU with PC at 0 and SP at `$FF00`.
pub fn cpu() -> Z80 {
    let mut cpu = Z80::new();
    let mut regs = *cpu.registers();
    regs.pc = 0;
    regs.sp = 0xFF00;
    cpu.set_registers(regs);
    cpu
}

/// Execute exactly one instruction with every flag class checked.
pub fn step(cpu: &mut Z80, bus: &mut TestBus) {
    let limit = cpu.instructions() + 1;
    cpu.run(bus, i32::MAX, limit, CellFlags::all());
}

/// Step until HALT, giving up after `max` instructions.
pub fn run_until_halt(cpu: &mut Z80, bus: &mut TestBus, max: u32) {
    for _ in 0..max {
        if cpu.registers().halted {
            return;
        }
        step(cpu, bus);
    }
    panic!("no HALT within {max} instructions");
}
