//! Machines built around small hand-assembled ROMs.

#![allow(dead_code)]

use emu_spectrum::{PeripheralKind, SHADOW_ROM_SIZE, Spectrum, SpectrumConfig, SpectrumModel};

/// Code placed at a ROM address.
pub type Patch<'a> = (u16, &'a [u8]);

/// Reads port `$FE` in a loop and stores each byte along `$4000-$40FF`,
/// with IM 1 interrupts enabled.
pub const ECHO_LOOP: &[Patch<'static>] = &[
    (
        0x0000,
        &[
            0x31, 0x00, 0x80, // LD SP,$8000
            0xED, 0x56, //       IM 1
            0xFB, //             EI
            0x21, 0x00, 0x40, // LD HL,$4000
            0xDB, 0xFE, //       loop: IN A,($FE)
            0x77, //             LD (HL),A
            0x2C, //             INC L
            0x18, 0xFA, //       JR loop
        ],
    ),
    (0x0038, &[0xFB, 0xC9]), // EI; RET
];

/// Polls port `$FE` and takes a longer path when bit 0 reads low, so the
/// timing of every later read depends on the earlier ones.
pub const BRANCH_LOOP: &[Patch<'static>] = &[(
    0x0000,
    &[
        0x31, 0x00, 0x80, // LD SP,$8000
        0xDB, 0xFE, //       loop: IN A,($FE)
        0x1F, //             RRA
        0x38, 0x02, //       JR C,skip
        0x00, //             NOP
        0x00, //             NOP
        0x18, 0xF7, //       skip: JR loop
    ],
)];

/// A 16K ROM of NOPs with `patches` applied.
pub fn rom_with(patches: &[Patch<'_>]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x4000];
    for &(addr, bytes) in patches {
        let start = usize::from(addr);
        rom[start..start + bytes.len()].copy_from_slice(bytes);
    }
    rom
}

pub fn config(patches: &[Patch<'_>]) -> SpectrumConfig {
    SpectrumConfig::new(SpectrumModel::Spectrum48K, rom_with(patches))
}

pub fn machine(patches: &[Patch<'_>]) -> Spectrum {
    Spectrum::new(config(patches)).expect("valid 48K config")
}

/// An 8K shadow ROM of NOPs with `patches` applied.
pub fn shadow_rom_with(patches: &[Patch<'_>]) -> Vec<u8> {
    let mut rom = vec![0u8; SHADOW_ROM_SIZE];
    for &(addr, bytes) in patches {
        let start = usize::from(addr);
        rom[start..start + bytes.len()].copy_from_slice(bytes);
    }
    rom
}

pub fn machine_with_shadow_rom(base: &[Patch<'_>], shadow: &[Patch<'_>]) -> Spectrum {
    let config = config(base)
        .with_shadow_rom(shadow_rom_with(shadow))
        .with_peripheral(PeripheralKind::ShadowRom);
    Spectrum::new(config).expect("valid shadow ROM config")
}
