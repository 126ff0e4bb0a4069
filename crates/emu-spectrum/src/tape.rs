//! Tape deck: instant ROM loading plus a real-time EAR signal.
//!
//! With a tape inserted, the deck traps the ROM's LD-BYTES routine at
//! `$0556`: the opcode fetched there is offered to the deck, which copies
//! the next block straight into memory, sets the registers the way the
//! routine would leave them, and substitutes `RET`.
//!
//! Pressing play instead feeds the pulse train to bit 6 of port `$FE`, for
//! custom loaders that read the EAR line themselves.

use std::any::Any;

use emu_core::{BlockId, CellFlags, Memory};
use serde::{Deserialize, Serialize};
use zilog_z80::{CF, Registers};

use crate::chain::{BusCtx, Peripheral, PortMatch, PortRead, decode_state};
use crate::tap::{TapBlock, TapFile};
use crate::tape_signal::TapeSignal;
use crate::ula::ULA_PORTS;

/// Entry point of the ROM's LD-BYTES routine.
pub const LD_BYTES: u16 = 0x0556;

const RET: u8 = 0xC9;

/// Names of the ROM blocks that hold the 48K BASIC loader.
const LOADER_ROMS: [&str; 2] = ["rom", "rom1"];

#[derive(Debug, Default)]
pub struct TapeDeck {
    tape: Option<TapFile>,
    /// Next block for the ROM trap.
    next_block: usize,
    /// Present while playing.
    signal: Option<TapeSignal>,
    /// Cycle up to which the signal has been advanced.
    last_cc: i32,
    /// ROM block whose `LD_BYTES` cell is flagged.
    loader_rom: Option<BlockId>,
}

#[derive(Serialize, Deserialize)]
struct TapeDeckState {
    tape: Option<TapFile>,
    next_block: usize,
    signal: Option<TapeSignal>,
    last_cc: i32,
}

impl TapeDeck {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tape: TapFile) {
        log::info!("tape: inserted ({} blocks)", tape.blocks.len());
        self.tape = Some(tape);
        self.next_block = 0;
        self.signal = None;
    }

    pub fn eject(&mut self) {
        self.tape = None;
        self.next_block = 0;
        self.signal = None;
    }

    pub fn rewind(&mut self) {
        self.next_block = 0;
        self.signal = None;
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.tape.is_some()
    }

    #[must_use]
    pub fn next_block(&self) -> usize {
        self.next_block
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.tape.as_ref().map_or(0, |t| t.blocks.len())
    }

    /// Start the EAR signal at the next block. `cc` is the current frame
    /// cycle.
    pub fn play(&mut self, cc: i32) {
        let Some(tape) = &self.tape else {
            return;
        };
        log::info!("tape: play from block {}", self.next_block);
        self.signal = Some(TapeSignal::new(&tape.blocks, self.next_block));
        self.last_cc = cc;
    }

    /// Stop the signal; the next trap or play resumes after the block that
    /// was playing.
    pub fn stop(&mut self) {
        if let Some(signal) = self.signal.take() {
            self.next_block = signal.block();
        }
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.signal.as_ref().is_some_and(|s| !s.is_stopped())
    }

    #[must_use]
    pub fn signal(&self) -> Option<&TapeSignal> {
        self.signal.as_ref()
    }

    fn catch_up(&mut self, cc: i32) {
        if let Some(signal) = &mut self.signal {
            if cc > self.last_cc {
                signal.advance((cc - self.last_cc) as u32);
            }
        }
        self.last_cc = cc;
    }

    fn find_loader_rom(memory: &Memory) -> Option<BlockId> {
        memory
            .block_ids()
            .find(|&id| LOADER_ROMS.contains(&memory.block(id).name()))
    }

    /// Emulate LD-BYTES for the next block. On entry A holds the expected
    /// flag, IX the destination, DE the length and carry selects LOAD over
    /// VERIFY.
    fn load_block(memory: &mut Memory, regs: &mut Registers, block: &TapBlock) {
        if block.flag != regs.a {
            log::debug!(
                "tape: flag ${:02X} does not match expected ${:02X}",
                block.flag,
                regs.a
            );
            regs.f &= !CF;
            return;
        }

        let load = regs.f & CF != 0;
        let wanted = usize::from(regs.de());
        let count = wanted.min(block.data.len());
        let mut ok = count == wanted;
        for (i, &byte) in block.data[..count].iter().enumerate() {
            let addr = regs.ix.wrapping_add(i as u16);
            if load {
                memory.store(addr, byte);
            } else if memory.peek(addr) != byte {
                ok = false;
            }
        }
        regs.ix = regs.ix.wrapping_add(count as u16);
        regs.set_de((wanted - count) as u16);
        if ok {
            regs.f |= CF;
        } else {
            regs.f &= !CF;
        }
        log::debug!(
            "tape: {} {count} bytes, {}",
            if load { "loaded" } else { "verified" },
            if ok { "ok" } else { "error" }
        );
    }
}

impl Peripheral for TapeDeck {
    fn name(&self) -> &'static str {
        "tape"
    }

    fn in_match(&self) -> Option<PortMatch> {
        self.signal.is_some().then_some(ULA_PORTS)
    }

    fn input(&mut self, ctx: &mut BusCtx<'_>, _port: u16) -> PortRead {
        self.catch_up(ctx.cc);
        match &self.signal {
            Some(signal) if !signal.is_stopped() => {
                PortRead::bits(if signal.level() { 0x40 } else { 0x00 }, 0x40)
            }
            _ => PortRead::NONE,
        }
    }

    fn power_on(&mut self, ctx: &mut BusCtx<'_>) {
        self.loader_rom = Self::find_loader_rom(ctx.memory);
        match self.loader_rom {
            Some(rom) => ctx.memory.block_mut(rom).set_flags(
                usize::from(LD_BYTES),
                1,
                CellFlags::PATCH_ON_EXEC,
            ),
            None => log::warn!("tape: no loader ROM found, trap disabled"),
        }
        self.signal = None;
        self.last_cc = ctx.cc;
    }

    fn detach(&mut self, ctx: &mut BusCtx<'_>) {
        if let Some(rom) = self.loader_rom.take() {
            ctx.memory.block_mut(rom).clear_flags(
                usize::from(LD_BYTES),
                1,
                CellFlags::PATCH_ON_EXEC,
            );
        }
    }

    fn frame_end(&mut self, cc: i32, frame_cycles: i32) {
        self.catch_up(cc);
        self.last_cc = cc - frame_cycles;
    }

    fn patch_opcode(
        &mut self,
        ctx: &mut BusCtx<'_>,
        regs: &mut Registers,
        pc: u16,
        opcode: u8,
    ) -> u8 {
        if pc != LD_BYTES || self.loader_rom != Some(ctx.memory.page(pc).read.block) {
            return opcode;
        }
        let Some(block) = self
            .tape
            .as_ref()
            .and_then(|tape| tape.blocks.get(self.next_block))
        else {
            return opcode;
        };
        if self.signal.take().is_some() {
            log::debug!("tape: trap taken while playing, signal stopped");
        }
        Self::load_block(ctx.memory, regs, block);
        self.next_block += 1;
        RET
    }

    fn save_state(&self) -> serde_json::Value {
        serde_json::json!(TapeDeckState {
            tape: self.tape.clone(),
            next_block: self.next_block,
            signal: self.signal.clone(),
            last_cc: self.last_cc,
        })
    }

    fn decode_state(&self, state: &serde_json::Value) -> Result<Box<dyn Any>, serde_json::Error> {
        decode_state::<TapeDeckState>(state)
    }

    fn apply_state(&mut self, _ctx: &mut BusCtx<'_>, state: Box<dyn Any>) {
        if let Ok(state) = state.downcast::<TapeDeckState>() {
            self.tape = state.tape;
            self.next_block = state.next_block;
            self.signal = state.signal;
            self.last_cc = state.last_cc;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryController48K;
    use crate::tape_signal::PILOT_PULSE;

    fn machine() -> (Memory, MemoryController48K) {
        let mut memory = Memory::new();
        let wait = memory.add_wait_table(vec![0; 224]);
        let mut controller = MemoryController48K::new(&mut memory, &[0; 0x4000], wait);
        controller.power_on(&mut BusCtx::detached(&mut memory, 0, 0.0));
        (memory, controller)
    }

    fn deck(memory: &mut Memory, blocks: Vec<TapBlock>) -> TapeDeck {
        let mut deck = TapeDeck::new();
        deck.power_on(&mut BusCtx::detached(memory, 0, 0.0));
        deck.insert(TapFile { blocks });
        deck
    }

    fn ld_bytes(flag: u8, dest: u16, len: u16, load: bool) -> Registers {
        let mut regs = Registers::power_on();
        regs.a = flag;
        regs.ix = dest;
        regs.set_de(len);
        regs.f = if load { CF } else { 0 };
        regs
    }

    fn trap(deck: &mut TapeDeck, memory: &mut Memory, regs: &mut Registers) -> u8 {
        deck.patch_opcode(&mut BusCtx::detached(memory, 0, 0.0), regs, LD_BYTES, 0x14)
    }

    #[test]
    fn power_on_flags_the_loader_entry() {
        let (mut memory, _controller) = machine();
        let _deck = deck(&mut memory, Vec::new());
        assert!(memory.read_cell(LD_BYTES).has(CellFlags::PATCH_ON_EXEC));
        assert!(!memory.read_cell(LD_BYTES + 1).has(CellFlags::PATCH_ON_EXEC));
    }

    #[test]
    fn trap_loads_block_and_returns() {
        let (mut memory, _controller) = machine();
        let mut deck = deck(&mut memory, vec![TapBlock::new(0xFF, vec![1, 2, 3])]);
        let mut regs = ld_bytes(0xFF, 0x8000, 3, true);

        assert_eq!(trap(&mut deck, &mut memory, &mut regs), RET);
        assert_eq!(memory.peek(0x8000), 1);
        assert_eq!(memory.peek(0x8002), 3);
        assert_ne!(regs.f & CF, 0);
        assert_eq!(regs.ix, 0x8003);
        assert_eq!(regs.de(), 0);
        assert_eq!(deck.next_block(), 1);
    }

    #[test]
    fn flag_mismatch_clears_carry() {
        let (mut memory, _controller) = machine();
        let mut deck = deck(&mut memory, vec![TapBlock::new(0x00, vec![9; 17])]);
        let mut regs = ld_bytes(0xFF, 0x8000, 17, true);

        assert_eq!(trap(&mut deck, &mut memory, &mut regs), RET);
        assert_eq!(regs.f & CF, 0);
        assert_eq!(memory.peek(0x8000), 0);
        assert_eq!(deck.next_block(), 1);
    }

    #[test]
    fn short_block_is_a_loading_error() {
        let (mut memory, _controller) = machine();
        let mut deck = deck(&mut memory, vec![TapBlock::new(0xFF, vec![7; 2])]);
        let mut regs = ld_bytes(0xFF, 0x9000, 4, true);

        trap(&mut deck, &mut memory, &mut regs);
        assert_eq!(regs.f & CF, 0);
        assert_eq!(memory.peek(0x9001), 7);
        assert_eq!(regs.de(), 2);
    }

    #[test]
    fn verify_compares_without_writing() {
        let (mut memory, _controller) = machine();
        memory.poke_slice(0x8000, &[5, 6]);
        let mut deck = deck(
            &mut memory,
            vec![TapBlock::new(0xFF, vec![5, 6]), TapBlock::new(0xFF, vec![5, 7])],
        );

        let mut regs = ld_bytes(0xFF, 0x8000, 2, false);
        trap(&mut deck, &mut memory, &mut regs);
        assert_ne!(regs.f & CF, 0);

        let mut regs = ld_bytes(0xFF, 0x8000, 2, false);
        trap(&mut deck, &mut memory, &mut regs);
        assert_eq!(regs.f & CF, 0);
        assert_eq!(memory.peek(0x8001), 6);
    }

    #[test]
    fn end_of_tape_runs_the_rom_routine() {
        let (mut memory, _controller) = machine();
        let mut deck = deck(&mut memory, Vec::new());
        let mut regs = ld_bytes(0xFF, 0x8000, 1, true);
        assert_eq!(trap(&mut deck, &mut memory, &mut regs), 0x14);
    }

    #[test]
    fn other_addresses_are_ignored() {
        let (mut memory, _controller) = machine();
        let mut deck = deck(&mut memory, vec![TapBlock::new(0xFF, vec![1])]);
        let mut regs = ld_bytes(0xFF, 0x8000, 1, true);
        let opcode =
            deck.patch_opcode(&mut BusCtx::detached(&mut memory, 0, 0.0), &mut regs, 0x0008, 0x2A);
        assert_eq!(opcode, 0x2A);
        assert_eq!(deck.next_block(), 0);
    }

    #[test]
    fn playing_tape_drives_ear_bit() {
        let (mut memory, _controller) = machine();
        let mut deck = deck(&mut memory, vec![TapBlock::new(0xFF, vec![0])]);
        assert!(deck.in_match().is_none());

        deck.play(0);
        assert!(deck.is_playing());
        let mut read = |cc| {
            deck.input(&mut BusCtx::detached(&mut memory, cc, 0.0), 0x00FE)
                .value
        };
        assert_eq!(read(10), 0xBF);
        assert_eq!(read(PILOT_PULSE as i32), 0xFF);
    }

    #[test]
    fn signal_carries_over_frame_end() {
        let (mut memory, _controller) = machine();
        let mut deck = deck(&mut memory, vec![TapBlock::new(0xFF, vec![0])]);
        deck.play(69_000);
        deck.frame_end(69_888, 69_888);
        // 888 cycles played before the frame end; 1280 more reach the edge.
        let level = |deck: &mut TapeDeck, memory: &mut Memory, cc| {
            deck.input(&mut BusCtx::detached(memory, cc, 0.0), 0x00FE).value & 0x40
        };
        assert_eq!(level(&mut deck, &mut memory, 1279), 0);
        assert_eq!(level(&mut deck, &mut memory, 1280), 0x40);
    }

    #[test]
    fn detach_clears_the_trap() {
        let (mut memory, _controller) = machine();
        let mut deck = deck(&mut memory, Vec::new());
        deck.detach(&mut BusCtx::detached(&mut memory, 0, 0.0));
        assert!(!memory.read_cell(LD_BYTES).has(CellFlags::PATCH_ON_EXEC));
    }
}
