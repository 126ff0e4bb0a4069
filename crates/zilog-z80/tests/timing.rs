//! Wait-state placement against a page wait table.

mod support;

use emu_core::{CellFlags, Source};
use proptest::prelude::*;
use support::{TestBus, cpu, step};

const TABLE: [u8; 4] = [0, 0, 1, 1];

/// RAM everywhere, with `$8000-$83FF` contended through `TABLE`.
fn contended_bus() -> TestBus {
    let mut bus = TestBus::new();
    let table = bus.memory.add_wait_table(TABLE.to_vec());
    let ram = bus.ram;
    let _ = bus.memory.map(
        0x8000,
        0x0400,
        Source::block(ram, 0x8000),
        Source::block(ram, 0x8000),
        None,
        Some(table),
    );
    bus.flag(0x8000, 0x0400, CellFlags::WAIT);
    bus
}

#[test]
fn contended_read_adds_table_entry_for_start_cycle() {
    for position in 0..8 {
        let mut bus = contended_bus();
        bus.load(0x0000, &[0x7E]); // LD A,(HL)
        let mut cpu = cpu();
        let mut regs = *cpu.registers();
        regs.set_hl(0x8000);
        cpu.set_registers(regs);

        // The read starts 4 cycles after the (uncontended) fetch.
        let entry = position - 4;
        cpu.set_cc(entry);
        step(&mut cpu, &mut bus);

        let wait = i32::from(TABLE[position as usize % 4]);
        assert_eq!(cpu.cc(), entry + 7 + wait, "read at cycle {position}");
    }
}

#[test]
fn waits_are_skipped_when_mode_omits_wait() {
    let mut bus = contended_bus();
    bus.load(0x0000, &[0x7E]);
    let mut cpu = cpu();
    let mut regs = *cpu.registers();
    regs.set_hl(0x8000);
    cpu.set_registers(regs);
    cpu.set_cc(-2);
    cpu.run(&mut bus, i32::MAX, 1, CellFlags::BREAKPOINTS);
    assert_eq!(cpu.cc(), 5);
}

#[test]
fn contended_fetch_charges_before_m1() {
    let mut bus = contended_bus();
    bus.load(0x8000, &[0x00]); // NOP in contended memory
    let mut cpu = cpu();
    let mut regs = *cpu.registers();
    regs.pc = 0x8000;
    cpu.set_registers(regs);
    cpu.set_cc(2);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.cc(), 2 + 1 + 4);
}

#[test]
fn internal_cycles_contend_on_ir() {
    let mut bus = contended_bus();
    bus.load(0x0000, &[0x03]); // INC BC
    let mut cpu = cpu();
    let mut regs = *cpu.registers();
    regs.i = 0x80;
    cpu.set_registers(regs);

    // Fetch ends at 6; IR cycles start at 6 (wait 1) and 8 (wait 0).
    cpu.set_cc(2);
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.cc(), 2 + 4 + (1 + 1) + 1);
}

#[test]
fn write_to_contended_cell_waits() {
    let mut bus = contended_bus();
    bus.load(0x0000, &[0x77]); // LD (HL),A
    let mut cpu = cpu();
    let mut regs = *cpu.registers();
    regs.set_hl(0x8001);
    cpu.set_registers(regs);
    cpu.set_cc(-1); // write starts at 3
    step(&mut cpu, &mut bus);
    assert_eq!(cpu.cc(), -1 + 7 + 1);
    assert_eq!(bus.memory.peek(0x8001), cpu.registers().a);
}

fn program(bus: &mut TestBus) {
    bus.load(
        0x0000,
        &[
            0x21, 0x00, 0x80, // LD HL,$8000
            0x06, 0x20, // LD B,32
            0x7E, // loop: LD A,(HL)
            0x23, // INC HL
            0x77, // LD (HL),A
            0x10, 0xFB, // DJNZ loop
            0x18, 0xF4, // JR to LD HL
        ],
    );
}

proptest! {
    #[test]
    fn same_start_same_result(start in -8i32..8, budget in 50i32..2000) {
        let run = || {
            let mut bus = contended_bus();
            program(&mut bus);
            let mut cpu = cpu();
            cpu.set_cc(start);
            cpu.run(&mut bus, start + budget, u64::MAX, CellFlags::all());
            (cpu.cc(), cpu.instructions(), *cpu.registers(), bus.memory.image())
        };
        prop_assert_eq!(run(), run());
    }
}
