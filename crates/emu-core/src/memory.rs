//! Memory blocks and the mapping layer between them and the CPU.
//!
//! `Memory` owns every block of cells in the machine (ROMs, RAM banks,
//! expansion memory) in an arena addressed by `BlockId`, and the page table
//! that decides which cells are visible at which address. Devices never hold
//! pointers into the arena; they hold block ids and re-map pages through
//! `map`/`unmap`.
//!
//! Two blocks always exist:
//! - `Memory::SINK` swallows writes to ROM or unmapped space.
//! - `Memory::UNMAPPED` reads as `$FF` wherever nothing is mapped.

use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellFlags};
use crate::error::MemoryImageError;
use crate::page_table::{
    BlockId, Mapping, PAGE_SIZE, Page, PageSource, PageTable, WaitTableId, check_page_range,
};

/// A named run of cells.
#[derive(Debug, Clone)]
pub struct MemoryBlock {
    name: String,
    cells: Vec<Cell>,
}

impl MemoryBlock {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    /// Set `flags` on `len` cells starting at `offset`.
    pub fn set_flags(&mut self, offset: usize, len: usize, flags: CellFlags) {
        for cell in &mut self.cells[offset..offset + len] {
            cell.flags |= flags;
        }
    }

    /// Clear `flags` on `len` cells starting at `offset`.
    pub fn clear_flags(&mut self, offset: usize, len: usize, flags: CellFlags) {
        for cell in &mut self.cells[offset..offset + len] {
            cell.flags &= !flags;
        }
    }

    /// Copy bytes into the block without touching flags.
    pub fn load(&mut self, offset: usize, data: &[u8]) {
        for (cell, &byte) in self.cells[offset..offset + data.len()].iter_mut().zip(data) {
            cell.data = byte;
        }
    }

    /// The block's bytes without flags.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.cells.iter().map(|c| c.data).collect()
    }
}

/// Where a mapping reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Cells of a block, starting at `offset` for the first mapped address.
    Block { block: BlockId, offset: usize },
    /// The write sink (ROM writes land here and are forgotten).
    Sink,
    /// Nothing: reads return `$FF`.
    Unmapped,
}

impl Source {
    /// Convenience constructor for `Source::Block`.
    #[must_use]
    pub const fn block(block: BlockId, offset: usize) -> Self {
        Self::Block { block, offset }
    }
}

/// Which of a page's targets an address resolves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Bytes of one block inside a `MemoryImage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockImage {
    pub name: String,
    pub data: Vec<u8>,
}

/// Contents of every device-owned block, in block order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryImage {
    pub blocks: Vec<BlockImage>,
}

/// The machine's memory: block arena, wait tables and page table.
#[derive(Debug, Clone)]
pub struct Memory {
    blocks: Vec<Option<MemoryBlock>>,
    wait_tables: Vec<Box<[u8]>>,
    pages: PageTable,
}

impl Memory {
    /// Write sink block.
    pub const SINK: BlockId = BlockId(0);
    /// Block read where nothing is mapped.
    pub const UNMAPPED: BlockId = BlockId(1);

    /// Empty memory: every page reads `UNMAPPED` and writes to `SINK`.
    #[must_use]
    pub fn new() -> Self {
        let reserved = |name: &str| {
            Some(MemoryBlock {
                name: name.to_string(),
                cells: vec![Cell::new(0xFF); PAGE_SIZE],
            })
        };
        let empty = Page {
            read: PageSource {
                block: Self::UNMAPPED,
                base: 0,
            },
            write: PageSource {
                block: Self::SINK,
                base: 0,
            },
            shadow: None,
            wait: None,
        };
        Self {
            blocks: vec![reserved("sink"), reserved("unmapped")],
            wait_tables: Vec::new(),
            pages: PageTable::filled(empty),
        }
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Allocate a block of `len` cells filled with `fill`.
    pub fn add_block(&mut self, name: &str, len: usize, fill: u8) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(MemoryBlock {
            name: name.to_string(),
            cells: vec![Cell::new(fill); len],
        }));
        log::debug!("memory: added block {name} ({len} bytes) as {}", id.index());
        id
    }

    /// Allocate a block initialised from `data`.
    pub fn add_block_from(&mut self, name: &str, data: &[u8]) -> BlockId {
        let id = self.add_block(name, data.len(), 0);
        self.block_mut(id).load(0, data);
        id
    }

    /// Release a block.
    ///
    /// # Panics
    ///
    /// Panics if the block is reserved, already freed, or still mapped. Pages
    /// must be unmapped before their backing storage goes away.
    pub fn free_block(&mut self, id: BlockId) {
        assert!(
            id != Self::SINK && id != Self::UNMAPPED,
            "reserved memory blocks cannot be freed"
        );
        assert!(
            !self.pages.references(id),
            "memory block {} is freed while still mapped",
            id.index()
        );
        let slot = &mut self.blocks[id.index()];
        assert!(slot.is_some(), "memory block {} freed twice", id.index());
        *slot = None;
        log::debug!("memory: freed block {}", id.index());
    }

    /// Borrow a block.
    ///
    /// # Panics
    ///
    /// Panics if the block was freed.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &MemoryBlock {
        self.blocks[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("memory block {} used after free", id.index()))
    }

    /// Mutably borrow a block.
    ///
    /// # Panics
    ///
    /// Panics if the block was freed.
    pub fn block_mut(&mut self, id: BlockId) -> &mut MemoryBlock {
        self.blocks[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("memory block {} used after free", id.index()))
    }

    /// Ids of every live, device-owned block.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .skip(2)
            .filter(|(_, b)| b.is_some())
            .map(|(i, _)| BlockId(i as u32))
    }

    // =========================================================================
    // Wait tables
    // =========================================================================

    /// Register a wait table: entry `i` is the number of extra cycles for an
    /// access starting at a cycle congruent to `i` modulo the table length.
    ///
    /// # Panics
    ///
    /// Panics if the table is empty.
    pub fn add_wait_table(&mut self, table: Vec<u8>) -> WaitTableId {
        assert!(!table.is_empty(), "wait table must not be empty");
        let id = WaitTableId(self.wait_tables.len() as u32);
        self.wait_tables.push(table.into_boxed_slice());
        id
    }

    /// Borrow a registered wait table.
    #[must_use]
    pub fn wait_table(&self, id: WaitTableId) -> &[u8] {
        &self.wait_tables[id.0 as usize]
    }

    /// Extra cycles for an access to `addr` starting at cycle `cc`, from the
    /// page's wait table. Zero when the page has none.
    #[inline]
    #[must_use]
    pub fn wait_cycles(&self, addr: u16, cc: i32) -> i32 {
        match self.pages.page(addr).wait {
            Some(id) => {
                let table = &self.wait_tables[id.0 as usize];
                i32::from(table[cc.rem_euclid(table.len() as i32) as usize])
            }
            None => 0,
        }
    }

    // =========================================================================
    // Mapping
    // =========================================================================

    /// Install a mapping over `len` bytes starting at `start`.
    ///
    /// Returns the displaced entries; hand them to `unmap` to restore the
    /// previous view exactly.
    ///
    /// # Panics
    ///
    /// Panics if the range is not page aligned, runs off the address space,
    /// or a block source is too short for the range.
    pub fn map(
        &mut self,
        start: u16,
        len: usize,
        read: Source,
        write: Source,
        shadow: Option<Source>,
        wait: Option<WaitTableId>,
    ) -> Mapping {
        let (first, count) = check_page_range(start, len);
        if let Some(id) = wait {
            assert!(
                (id.0 as usize) < self.wait_tables.len(),
                "unknown wait table {}",
                id.0
            );
        }
        let pages: Vec<Page> = (0..count)
            .map(|i| Page {
                read: self.page_source(read, i, len),
                write: self.page_source(write, i, len),
                shadow: shadow.map(|s| self.page_source(s, i, len)),
                wait,
            })
            .collect();
        let saved = self.pages.replace(first, &pages);
        Mapping {
            first_page: first,
            saved,
        }
    }

    /// Restore the entries a `map` call displaced.
    pub fn unmap(&mut self, mapping: Mapping) {
        let _ = self.pages.replace(mapping.first_page, &mapping.saved);
    }

    fn page_source(&self, source: Source, page_index: usize, len: usize) -> PageSource {
        match source {
            Source::Block { block, offset } => {
                let available = self.block(block).len();
                assert!(
                    offset + len <= available,
                    "mapping {len} bytes at offset {offset} overruns block {} ({available} bytes)",
                    block.index()
                );
                PageSource {
                    block,
                    base: offset + page_index * PAGE_SIZE,
                }
            }
            Source::Sink => PageSource {
                block: Self::SINK,
                base: 0,
            },
            Source::Unmapped => PageSource {
                block: Self::UNMAPPED,
                base: 0,
            },
        }
    }

    /// The page table.
    #[must_use]
    pub fn pages(&self) -> &PageTable {
        &self.pages
    }

    /// Page entry for an address.
    #[inline]
    #[must_use]
    pub fn page(&self, addr: u16) -> &Page {
        self.pages.page(addr)
    }

    // =========================================================================
    // Cell access
    // =========================================================================

    #[inline]
    fn cell_at(&self, source: PageSource, addr: u16) -> Cell {
        match &self.blocks[source.block.index()] {
            Some(block) => block.cells[source.cell_index(addr)],
            None => panic!("memory block {} used after free", source.block.index()),
        }
    }

    #[inline]
    fn cell_at_mut(&mut self, source: PageSource, addr: u16) -> &mut Cell {
        match &mut self.blocks[source.block.index()] {
            Some(block) => &mut block.cells[source.cell_index(addr)],
            None => panic!("memory block {} used after free", source.block.index()),
        }
    }

    /// The cell a read of `addr` sees.
    #[inline]
    #[must_use]
    pub fn read_cell(&self, addr: u16) -> Cell {
        self.cell_at(self.pages.page(addr).read, addr)
    }

    /// The cell a write to `addr` lands in.
    #[inline]
    #[must_use]
    pub fn write_cell(&self, addr: u16) -> Cell {
        self.cell_at(self.pages.page(addr).write, addr)
    }

    /// The shadow cell a write to `addr` is mirrored into, if any.
    #[inline]
    #[must_use]
    pub fn shadow_cell(&self, addr: u16) -> Option<Cell> {
        self.pages
            .page(addr)
            .shadow
            .map(|source| self.cell_at(source, addr))
    }

    /// Store a byte in the primary write target of `addr`. Flags are kept.
    #[inline]
    pub fn store(&mut self, addr: u16, value: u8) {
        let source = self.pages.page(addr).write;
        self.cell_at_mut(source, addr).data = value;
    }

    /// Store a byte in the shadow target of `addr`, if the page has one.
    #[inline]
    pub fn store_shadow(&mut self, addr: u16, value: u8) {
        if let Some(source) = self.pages.page(addr).shadow {
            self.cell_at_mut(source, addr).data = value;
        }
    }

    /// Read a byte without side effects or timing.
    #[inline]
    #[must_use]
    pub fn peek(&self, addr: u16) -> u8 {
        self.read_cell(addr).data
    }

    /// Byte `index` cells past `source`, bypassing the page table. `None`
    /// when `source` is not a live block or the index runs off its end.
    #[must_use]
    pub fn byte_at(&self, source: Source, index: usize) -> Option<u8> {
        let Source::Block { block, offset } = source else {
            return None;
        };
        let cells = self.blocks.get(block.index())?.as_ref()?.cells();
        cells.get(offset.checked_add(index)?).map(|cell| cell.data)
    }

    /// Overwrite the byte a read of `addr` sees, even in ROM. For debuggers
    /// and loaders; the CPU goes through `store`.
    pub fn poke(&mut self, addr: u16, value: u8) {
        let source = self.pages.page(addr).read;
        self.cell_at_mut(source, addr).data = value;
    }

    /// Copy `data` to consecutive addresses through `poke`.
    pub fn poke_slice(&mut self, addr: u16, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.poke(addr.wrapping_add(i as u16), byte);
        }
    }

    /// The storage cell behind `addr` for the given access kind.
    pub fn cell_mut(&mut self, addr: u16, access: Access) -> &mut Cell {
        let page = *self.pages.page(addr);
        let source = match access {
            Access::Read => page.read,
            Access::Write => page.write,
        };
        self.cell_at_mut(source, addr)
    }

    /// True if the cell a read of `addr` sees is contended.
    #[must_use]
    pub fn is_contended(&self, addr: u16) -> bool {
        self.read_cell(addr).has(CellFlags::WAIT)
    }

    // =========================================================================
    // Images
    // =========================================================================

    /// Capture the bytes of every device-owned block.
    #[must_use]
    pub fn image(&self) -> MemoryImage {
        MemoryImage {
            blocks: self
                .block_ids()
                .map(|id| {
                    let block = self.block(id);
                    BlockImage {
                        name: block.name.clone(),
                        data: block.bytes(),
                    }
                })
                .collect(),
        }
    }

    /// Check that `image` has exactly this memory's block layout.
    pub fn check_image(&self, image: &MemoryImage) -> Result<(), MemoryImageError> {
        let ids: Vec<BlockId> = self.block_ids().collect();
        if ids.len() != image.blocks.len() {
            return Err(MemoryImageError::BlockCount {
                expected: ids.len(),
                found: image.blocks.len(),
            });
        }
        for (id, saved) in ids.iter().zip(&image.blocks) {
            let block = self.block(*id);
            if block.name != saved.name {
                return Err(MemoryImageError::BlockName {
                    expected: block.name.clone(),
                    found: saved.name.clone(),
                });
            }
            if block.len() != saved.data.len() {
                return Err(MemoryImageError::BlockSize {
                    name: block.name.clone(),
                    expected: block.len(),
                    found: saved.data.len(),
                });
            }
        }
        Ok(())
    }

    /// Replace block contents from `image`. Flags are untouched. Nothing is
    /// written unless the whole image matches.
    pub fn restore_image(&mut self, image: &MemoryImage) -> Result<(), MemoryImageError> {
        self.check_image(image)?;
        let ids: Vec<BlockId> = self.block_ids().collect();
        for (id, saved) in ids.into_iter().zip(&image.blocks) {
            self.block_mut(id).load(0, &saved.data);
        }
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_table::PAGE_SIZE;

    fn ram_at(memory: &mut Memory, start: u16, len: usize) -> (BlockId, Mapping) {
        let block = memory.add_block("ram", len, 0);
        let mapping = memory.map(
            start,
            len,
            Source::block(block, 0),
            Source::block(block, 0),
            None,
            None,
        );
        (block, mapping)
    }

    #[test]
    fn fresh_memory_reads_ff_and_swallows_writes() {
        let mut memory = Memory::new();
        assert_eq!(memory.peek(0x1234), 0xFF);
        memory.store(0x1234, 0x00);
        assert_eq!(memory.peek(0x1234), 0xFF);
    }

    #[test]
    fn ram_round_trip() {
        let mut memory = Memory::new();
        let _ = ram_at(&mut memory, 0x8000, 0x8000);
        memory.store(0x8123, 0x5A);
        assert_eq!(memory.peek(0x8123), 0x5A);
    }

    #[test]
    fn rom_reads_block_and_sinks_writes() {
        let mut memory = Memory::new();
        let rom = memory.add_block_from("rom", &[0x11; PAGE_SIZE]);
        let _ = memory.map(
            0x0000,
            PAGE_SIZE,
            Source::block(rom, 0),
            Source::Sink,
            None,
            None,
        );
        memory.store(0x0010, 0x22);
        assert_eq!(memory.peek(0x0010), 0x11);
        assert_eq!(memory.block(rom).cells()[0x10].data, 0x11);
    }

    #[test]
    fn shadow_receives_mirrored_writes() {
        let mut memory = Memory::new();
        let main = memory.add_block("main", PAGE_SIZE, 0);
        let mirror = memory.add_block("mirror", PAGE_SIZE, 0);
        let _ = memory.map(
            0x4000,
            PAGE_SIZE,
            Source::block(main, 0),
            Source::block(main, 0),
            Some(Source::block(mirror, 0)),
            None,
        );
        memory.store(0x4001, 0x77);
        memory.store_shadow(0x4001, 0x77);
        assert_eq!(memory.block(main).cells()[1].data, 0x77);
        assert_eq!(memory.block(mirror).cells()[1].data, 0x77);
        assert_eq!(memory.shadow_cell(0x4001).map(|c| c.data), Some(0x77));
    }

    #[test]
    fn flags_follow_storage_not_address() {
        let mut memory = Memory::new();
        let bank = memory.add_block("bank", PAGE_SIZE, 0);
        memory.block_mut(bank).set_flags(5, 1, CellFlags::BREAK_READ);

        let first = memory.map(
            0x4000,
            PAGE_SIZE,
            Source::block(bank, 0),
            Source::block(bank, 0),
            None,
            None,
        );
        assert!(memory.read_cell(0x4005).has(CellFlags::BREAK_READ));
        memory.unmap(first);

        let _ = memory.map(
            0xC000,
            PAGE_SIZE,
            Source::block(bank, 0),
            Source::block(bank, 0),
            None,
            None,
        );
        assert!(memory.read_cell(0xC005).has(CellFlags::BREAK_READ));
        assert!(!memory.read_cell(0x4005).has(CellFlags::BREAK_READ));
    }

    #[test]
    fn unmap_restores_previous_mapping() {
        let mut memory = Memory::new();
        let (_, _base) = ram_at(&mut memory, 0x0000, 0x4000);
        memory.store(0x0100, 0xAA);
        let before = memory.pages().clone();

        let overlay = memory.add_block_from("overlay", &[0x55; 0x2000]);
        let mapping = memory.map(
            0x0000,
            0x2000,
            Source::block(overlay, 0),
            Source::Sink,
            None,
            None,
        );
        assert_eq!(memory.peek(0x0100), 0x55);

        memory.unmap(mapping);
        assert_eq!(memory.pages(), &before);
        assert_eq!(memory.peek(0x0100), 0xAA);
    }

    #[test]
    fn wait_cycles_index_by_cycle_modulo_table_length() {
        let mut memory = Memory::new();
        let block = memory.add_block("contended", PAGE_SIZE, 0);
        let table = memory.add_wait_table(vec![0, 0, 1, 1]);
        let _ = memory.map(
            0x4000,
            PAGE_SIZE,
            Source::block(block, 0),
            Source::block(block, 0),
            None,
            Some(table),
        );
        let waits: Vec<i32> = (0..8).map(|cc| memory.wait_cycles(0x4000, cc)).collect();
        assert_eq!(waits, vec![0, 0, 1, 1, 0, 0, 1, 1]);
        assert_eq!(memory.wait_cycles(0x4000, -1), 1);
        assert_eq!(memory.wait_cycles(0x8000, 2), 0);
    }

    #[test]
    #[should_panic(expected = "still mapped")]
    fn freeing_mapped_block_panics() {
        let mut memory = Memory::new();
        let (block, _mapping) = ram_at(&mut memory, 0x8000, PAGE_SIZE);
        memory.free_block(block);
    }

    #[test]
    fn free_after_unmap_is_allowed() {
        let mut memory = Memory::new();
        let (block, mapping) = ram_at(&mut memory, 0x8000, PAGE_SIZE);
        memory.unmap(mapping);
        memory.free_block(block);
        assert_eq!(memory.block_ids().count(), 0);
    }

    #[test]
    #[should_panic(expected = "overruns")]
    fn mapping_past_block_end_panics() {
        let mut memory = Memory::new();
        let block = memory.add_block("small", PAGE_SIZE, 0);
        let _ = memory.map(
            0x0000,
            2 * PAGE_SIZE,
            Source::block(block, 0),
            Source::Sink,
            None,
            None,
        );
    }

    #[test]
    fn image_restore_is_all_or_nothing() {
        let mut memory = Memory::new();
        let (a, _) = ram_at(&mut memory, 0x8000, PAGE_SIZE);
        memory.store(0x8000, 1);
        let mut image = memory.image();
        image.blocks[0].data[0] = 9;

        let mut wrong = image.clone();
        wrong.blocks[0].data.pop();
        assert!(matches!(
            memory.restore_image(&wrong),
            Err(MemoryImageError::BlockSize { .. })
        ));
        assert_eq!(memory.block(a).cells()[0].data, 1);

        memory.restore_image(&image).unwrap();
        assert_eq!(memory.peek(0x8000), 9);
    }
}

#[cfg(test)]
mod props {
    use super::*;
    use proptest::prelude::*;

    fn page_aligned_range() -> impl Strategy<Value = (u16, usize)> {
        (0usize..64).prop_flat_map(|first| {
            (Just(first), 1usize..=(64 - first))
                .prop_map(|(first, count)| ((first * PAGE_SIZE) as u16, count * PAGE_SIZE))
        })
    }

    proptest! {
        #[test]
        fn read_after_map_returns_last_write(
            (start, len) in page_aligned_range(),
            writes in prop::collection::vec((any::<u16>(), any::<u8>()), 1..64),
            fill in any::<u8>(),
        ) {
            let mut memory = Memory::new();
            let block = memory.add_block("ram", len, fill);
            let _mapping = memory.map(
                start,
                len,
                Source::block(block, 0),
                Source::block(block, 0),
                None,
                None,
            );

            let mut expected = vec![fill; len];
            for (offset, value) in writes {
                let offset = usize::from(offset) % len;
                let addr = start.wrapping_add(offset as u16);
                memory.store(addr, value);
                expected[offset] = value;
                prop_assert_eq!(memory.peek(addr), value);
            }
            for (offset, &value) in expected.iter().enumerate() {
                prop_assert_eq!(memory.peek(start.wrapping_add(offset as u16)), value);
            }
        }

        #[test]
        fn unmap_restores_pages_and_flags(
            (start, len) in page_aligned_range(),
            flagged in any::<u16>(),
        ) {
            let mut memory = Memory::new();
            let base = memory.add_block("base", 0x1_0000, 0x11);
            let _ = memory.map(0, 0x1_0000, Source::block(base, 0), Source::block(base, 0), None, None);
            memory.cell_mut(flagged, Access::Read).flags |= CellFlags::BREAK_READ;
            let pages_before = memory.pages().clone();
            let image_before = memory.image();

            let overlay = memory.add_block("overlay", len, 0x22);
            let mapping = memory.map(
                start,
                len,
                Source::block(overlay, 0),
                Source::Sink,
                Some(Source::block(base, usize::from(start))),
                None,
            );
            memory.unmap(mapping);

            prop_assert_eq!(memory.pages(), &pages_before);
            prop_assert!(memory.read_cell(flagged).has(CellFlags::BREAK_READ));
            let flagged_count = memory
                .block(overlay)
                .cells()
                .iter()
                .filter(|c| !c.flags.is_empty())
                .count();
            prop_assert_eq!(flagged_count, 0);
            prop_assert_eq!(memory.peek(start), image_before.blocks[0].data[usize::from(start)]);
        }
    }
}
