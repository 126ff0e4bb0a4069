//! Memory controllers: link 0 of every chain.
//!
//! The controller owns the machine's ROM and RAM blocks, flags the cells
//! that need special handling and installs the page mappings. Flags go on
//! storage cells once, at construction; paging only changes which cells are
//! visible.
//!
//! - Contended RAM cells carry `WAIT` and their pages the ULA wait table.
//! - Screen memory carries `VIDEO_TRACK`.
//! - ROM pages write to the sink.

use std::any::Any;

use emu_core::{BlockId, CellFlags, Memory, Source, WaitTableId};
use serde::{Deserialize, Serialize};

use crate::chain::{BusCtx, Peripheral, PortMatch, decode_state};

/// Size of one ROM or RAM bank.
pub const BANK_SIZE: usize = 0x4000;

/// Bitmap plus attributes at the start of a screen bank.
const SCREEN_SIZE: usize = 0x1B00;

fn map_rom(memory: &mut Memory, rom: BlockId) {
    let _ = memory.map(0x0000, BANK_SIZE, Source::block(rom, 0), Source::Sink, None, None);
}

fn map_ram(memory: &mut Memory, start: u16, ram: BlockId, offset: usize, wait: Option<WaitTableId>) {
    let _ = memory.map(
        start,
        BANK_SIZE,
        Source::block(ram, offset),
        Source::block(ram, offset),
        None,
        wait,
    );
}

fn contend_bank(memory: &mut Memory, block: BlockId) {
    memory.block_mut(block).set_flags(0, BANK_SIZE, CellFlags::WAIT);
}

/// 16K ROM and 48K RAM; `$4000-$7FFF` is contended.
pub struct MemoryController48K {
    rom: BlockId,
    ram: BlockId,
    wait: WaitTableId,
    rom_visible: bool,
}

#[derive(Serialize, Deserialize)]
struct State48K {
    rom_visible: bool,
}

impl MemoryController48K {
    /// # Panics
    ///
    /// Panics if `rom` is not exactly 16,384 bytes.
    #[must_use]
    pub fn new(memory: &mut Memory, rom: &[u8], wait: WaitTableId) -> Self {
        assert!(
            rom.len() == BANK_SIZE,
            "48K ROM must be exactly 16384 bytes, got {}",
            rom.len()
        );
        let rom = memory.add_block_from("rom", rom);
        let ram = memory.add_block("ram", 3 * BANK_SIZE, 0);
        contend_bank(memory, ram);
        memory
            .block_mut(ram)
            .set_flags(0, SCREEN_SIZE, CellFlags::VIDEO_TRACK);
        Self {
            rom,
            ram,
            wait,
            rom_visible: true,
        }
    }

    #[must_use]
    pub fn rom_visible(&self) -> bool {
        self.rom_visible
    }

    fn map_all(&self, memory: &mut Memory) {
        if self.rom_visible {
            map_rom(memory, self.rom);
        }
        map_ram(memory, 0x4000, self.ram, 0, Some(self.wait));
        map_ram(memory, 0x8000, self.ram, BANK_SIZE, None);
        map_ram(memory, 0xC000, self.ram, 2 * BANK_SIZE, None);
    }
}

impl Peripheral for MemoryController48K {
    fn name(&self) -> &'static str {
        "memory-48k"
    }

    fn set_rom_visible(&mut self, ctx: &mut BusCtx<'_>, visible: bool) {
        self.rom_visible = visible;
        if visible {
            map_rom(ctx.memory, self.rom);
        }
    }

    fn screen(&self) -> Option<Source> {
        Some(Source::block(self.ram, 0))
    }

    fn power_on(&mut self, ctx: &mut BusCtx<'_>) {
        self.rom_visible = true;
        self.map_all(ctx.memory);
    }

    fn save_state(&self) -> serde_json::Value {
        serde_json::json!(State48K {
            rom_visible: self.rom_visible
        })
    }

    fn decode_state(&self, state: &serde_json::Value) -> Result<Box<dyn Any>, serde_json::Error> {
        decode_state::<State48K>(state)
    }

    fn apply_state(&mut self, ctx: &mut BusCtx<'_>, state: Box<dyn Any>) {
        if let Ok(state) = state.downcast::<State48K>() {
            self.rom_visible = state.rom_visible;
            self.map_all(ctx.memory);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Two 16K ROMs and eight 16K RAM banks paged through port `$7FFD`.
///
/// ```text
/// $0000-$3FFF: ROM 0 or 1 ($7FFD bit 4)
/// $4000-$7FFF: bank 5 (contended)
/// $8000-$BFFF: bank 2
/// $C000-$FFFF: bank 0-7 ($7FFD bits 0-2); odd banks are contended
/// ```
///
/// Bit 3 selects the shadow screen (bank 7); bit 5 locks the register until
/// the next reset.
pub struct MemoryController128K {
    roms: [BlockId; 2],
    banks: [BlockId; 8],
    wait: WaitTableId,
    bank_reg: u8,
    locked: bool,
    rom_visible: bool,
}

#[derive(Serialize, Deserialize)]
struct State128K {
    bank_reg: u8,
    locked: bool,
    rom_visible: bool,
}

impl MemoryController128K {
    /// # Panics
    ///
    /// Panics if `rom` is not exactly 32,768 bytes.
    #[must_use]
    pub fn new(memory: &mut Memory, rom: &[u8], wait: WaitTableId) -> Self {
        assert!(
            rom.len() == 2 * BANK_SIZE,
            "128K ROM must be exactly 32768 bytes, got {}",
            rom.len()
        );
        let roms = [
            memory.add_block_from("rom0", &rom[..BANK_SIZE]),
            memory.add_block_from("rom1", &rom[BANK_SIZE..]),
        ];
        let banks: [BlockId; 8] =
            std::array::from_fn(|n| memory.add_block(&format!("ram{n}"), BANK_SIZE, 0));
        for bank in banks.iter().skip(1).step_by(2) {
            contend_bank(memory, *bank);
        }
        for screen in [banks[5], banks[7]] {
            memory
                .block_mut(screen)
                .set_flags(0, SCREEN_SIZE, CellFlags::VIDEO_TRACK);
        }
        Self {
            roms,
            banks,
            wait,
            bank_reg: 0,
            locked: false,
            rom_visible: true,
        }
    }

    /// Last value accepted by `$7FFD`.
    #[must_use]
    pub fn bank_register(&self) -> u8 {
        self.bank_reg
    }

    #[must_use]
    pub fn locked(&self) -> bool {
        self.locked
    }

    #[must_use]
    pub fn rom_visible(&self) -> bool {
        self.rom_visible
    }

    /// RAM bank the ULA displays.
    #[must_use]
    pub fn screen_bank(&self) -> u8 {
        if self.bank_reg & 0x08 != 0 { 7 } else { 5 }
    }

    fn rom(&self) -> BlockId {
        self.roms[usize::from((self.bank_reg >> 4) & 1)]
    }

    fn paged_bank(&self) -> usize {
        usize::from(self.bank_reg & 0x07)
    }

    fn map_top(&self, memory: &mut Memory) {
        let bank = self.paged_bank();
        let wait = (bank % 2 == 1).then_some(self.wait);
        map_ram(memory, 0xC000, self.banks[bank], 0, wait);
    }

    fn map_all(&self, memory: &mut Memory) {
        if self.rom_visible {
            map_rom(memory, self.rom());
        }
        map_ram(memory, 0x4000, self.banks[5], 0, Some(self.wait));
        map_ram(memory, 0x8000, self.banks[2], 0, None);
        self.map_top(memory);
    }
}

impl Peripheral for MemoryController128K {
    fn name(&self) -> &'static str {
        "memory-128k"
    }

    fn out_match(&self) -> Option<PortMatch> {
        Some(PortMatch::new(0x8002, 0x0000))
    }

    fn output(&mut self, ctx: &mut BusCtx<'_>, _port: u16, value: u8) {
        if self.locked {
            return;
        }
        let old = self.bank_reg;
        self.bank_reg = value;
        self.locked = value & 0x20 != 0;
        if (old ^ value) & 0x07 != 0 {
            log::debug!("memory-128k: bank {} at $C000", self.paged_bank());
            self.map_top(ctx.memory);
        }
        if (old ^ value) & 0x10 != 0 && self.rom_visible {
            log::debug!("memory-128k: rom {}", (value >> 4) & 1);
            map_rom(ctx.memory, self.rom());
        }
        if self.locked {
            log::debug!("memory-128k: paging locked");
        }
    }

    fn set_rom_visible(&mut self, ctx: &mut BusCtx<'_>, visible: bool) {
        self.rom_visible = visible;
        if visible {
            map_rom(ctx.memory, self.rom());
        }
    }

    fn screen(&self) -> Option<Source> {
        Some(Source::block(self.banks[usize::from(self.screen_bank())], 0))
    }

    fn power_on(&mut self, ctx: &mut BusCtx<'_>) {
        self.bank_reg = 0;
        self.locked = false;
        self.rom_visible = true;
        self.map_all(ctx.memory);
    }

    fn reset(&mut self, ctx: &mut BusCtx<'_>) {
        self.power_on(ctx);
    }

    fn save_state(&self) -> serde_json::Value {
        serde_json::json!(State128K {
            bank_reg: self.bank_reg,
            locked: self.locked,
            rom_visible: self.rom_visible,
        })
    }

    fn decode_state(&self, state: &serde_json::Value) -> Result<Box<dyn Any>, serde_json::Error> {
        decode_state::<State128K>(state)
    }

    fn apply_state(&mut self, ctx: &mut BusCtx<'_>, state: Box<dyn Any>) {
        if let Ok(state) = state.downcast::<State128K>() {
            self.bank_reg = state.bank_reg;
            self.locked = state.locked;
            self.rom_visible = state.rom_visible;
            self.map_all(ctx.memory);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
