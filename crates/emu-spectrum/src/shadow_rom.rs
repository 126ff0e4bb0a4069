//! Interface 1 style shadow ROM.
//!
//! An 8K ROM that pages itself over `$0000-$3FFF` (mirrored) when the CPU
//! fetches an opcode from a base ROM's error restart at `$0008` or its
//! `CLOSE #` entry at `$1708`, and pages out again after fetching from
//! `$0700` of its own ROM. Paging is a pair of requests to the link
//! upstream: hide your ROM, later show it again.

use std::any::Any;

use emu_core::{BlockId, CellFlags, Memory, Source};
use serde::{Deserialize, Serialize};
use zilog_z80::Registers;

use crate::chain::{BusCtx, Peripheral, decode_state};

pub const SHADOW_ROM_SIZE: usize = 0x2000;

/// Base ROM fetches that page the shadow ROM in.
pub const PAGE_IN: [u16; 2] = [0x0008, 0x1708];

/// Shadow ROM fetch that pages it out.
pub const PAGE_OUT: u16 = 0x0700;

/// Names of the base ROM blocks whose restarts page the shadow ROM in.
const BASE_ROMS: [&str; 3] = ["rom", "rom0", "rom1"];

pub struct ShadowRom {
    rom: BlockId,
    /// Base ROM cells flagged at power-on, as (block, offset).
    triggers: Vec<(BlockId, usize)>,
    paged: bool,
    /// False while a downstream link hides the ROM area.
    rom_visible: bool,
}

#[derive(Serialize, Deserialize)]
struct ShadowRomState {
    paged: bool,
    rom_visible: bool,
}

impl ShadowRom {
    /// # Panics
    ///
    /// Panics if `rom` is not exactly 8,192 bytes.
    #[must_use]
    pub fn new(memory: &mut Memory, rom: &[u8]) -> Self {
        assert!(
            rom.len() == SHADOW_ROM_SIZE,
            "shadow ROM must be exactly 8192 bytes, got {}",
            rom.len()
        );
        let rom = memory.add_block_from("shadow-rom", rom);
        memory
            .block_mut(rom)
            .set_flags(usize::from(PAGE_OUT), 1, CellFlags::PATCH_ON_EXEC);
        Self {
            rom,
            triggers: Vec::new(),
            paged: false,
            rom_visible: true,
        }
    }

    #[must_use]
    pub fn is_paged(&self) -> bool {
        self.paged
    }

    fn map(&self, memory: &mut Memory) {
        for start in [0x0000, 0x2000] {
            let _ = memory.map(
                start,
                SHADOW_ROM_SIZE,
                Source::block(self.rom, 0),
                Source::Sink,
                None,
                None,
            );
        }
    }

    fn page_in(&mut self, ctx: &mut BusCtx<'_>) {
        log::debug!("shadow-rom: paged in at cycle {}", ctx.cc);
        self.paged = true;
        ctx.set_upstream_rom_visible(false);
        self.map(ctx.memory);
    }

    fn page_out(&mut self, ctx: &mut BusCtx<'_>) {
        log::debug!("shadow-rom: paged out at cycle {}", ctx.cc);
        self.paged = false;
        ctx.set_upstream_rom_visible(true);
    }

    fn showing(&self, memory: &Memory, pc: u16) -> bool {
        memory.page(pc).read.block == self.rom
    }

    /// Whether the fetch at `pc` came from a flagged base ROM cell.
    fn triggered(&self, memory: &Memory, pc: u16) -> bool {
        let source = memory.page(pc).read;
        let offset = source.cell_index(pc);
        self.triggers.contains(&(source.block, offset))
    }
}

impl Peripheral for ShadowRom {
    fn name(&self) -> &'static str {
        "shadow-rom"
    }

    fn set_rom_visible(&mut self, ctx: &mut BusCtx<'_>, visible: bool) {
        self.rom_visible = visible;
        if !self.paged {
            ctx.set_upstream_rom_visible(visible);
        } else if visible {
            self.map(ctx.memory);
        }
    }

    fn power_on(&mut self, ctx: &mut BusCtx<'_>) {
        self.paged = false;
        self.rom_visible = true;
        let memory = &mut *ctx.memory;
        let roms: Vec<BlockId> = memory
            .block_ids()
            .filter(|&id| BASE_ROMS.contains(&memory.block(id).name()))
            .collect();
        if roms.is_empty() {
            log::warn!("shadow-rom: no base ROM found, page-in disabled");
        }
        self.triggers.clear();
        for rom in roms {
            for addr in PAGE_IN {
                let offset = usize::from(addr);
                memory
                    .block_mut(rom)
                    .set_flags(offset, 1, CellFlags::PATCH_ON_EXEC);
                self.triggers.push((rom, offset));
            }
        }
    }

    fn reset(&mut self, ctx: &mut BusCtx<'_>) {
        if self.paged {
            self.page_out(ctx);
        }
    }

    fn detach(&mut self, ctx: &mut BusCtx<'_>) {
        if self.paged {
            self.page_out(ctx);
        }
        for (block, offset) in self.triggers.drain(..) {
            ctx.memory
                .block_mut(block)
                .clear_flags(offset, 1, CellFlags::PATCH_ON_EXEC);
        }
        if ctx.memory.pages().references(self.rom) {
            log::warn!("shadow-rom: still mapped on detach, block kept");
        } else {
            ctx.memory.free_block(self.rom);
        }
    }

    fn patch_opcode(
        &mut self,
        ctx: &mut BusCtx<'_>,
        _regs: &mut Registers,
        pc: u16,
        opcode: u8,
    ) -> u8 {
        if !self.paged && self.rom_visible && PAGE_IN.contains(&pc) && self.triggered(ctx.memory, pc) {
            self.page_in(ctx);
            return ctx.memory.peek(pc);
        }
        if self.paged && pc == PAGE_OUT && self.showing(ctx.memory, pc) {
            // The fetch itself still came from the shadow ROM.
            self.page_out(ctx);
        }
        opcode
    }

    fn save_state(&self) -> serde_json::Value {
        serde_json::json!(ShadowRomState {
            paged: self.paged,
            rom_visible: self.rom_visible,
        })
    }

    fn decode_state(&self, state: &serde_json::Value) -> Result<Box<dyn Any>, serde_json::Error> {
        decode_state::<ShadowRomState>(state)
    }

    fn apply_state(&mut self, ctx: &mut BusCtx<'_>, state: Box<dyn Any>) {
        if let Ok(state) = state.downcast::<ShadowRomState>() {
            self.paged = state.paged;
            self.rom_visible = state.rom_visible;
            if self.paged && self.rom_visible {
                self.map(ctx.memory);
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
