//! Page table: the CPU's view of the 16-bit address space.
//!
//! The address space is split into `PAGE_COUNT` slots of `PAGE_SIZE` bytes.
//! Every slot names where reads come from, where writes go, an optional
//! shadow write target and an optional wait table. Resolving an address is a
//! shift and an index: exactly one entry is consulted per access.

/// log2 of the page size. Matches the finest decode granularity of the
/// supported hardware (1K, for expansion ROM overlays).
pub const PAGE_BITS: u32 = 10;

/// Bytes per page.
pub const PAGE_SIZE: usize = 1 << PAGE_BITS;

/// Mask for the offset of an address within its page.
pub const PAGE_MASK: u16 = (PAGE_SIZE - 1) as u16;

/// Number of pages covering the 64K address space.
pub const PAGE_COUNT: usize = 0x1_0000 >> PAGE_BITS;

/// Handle of a memory block owned by `Memory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Index of the block in the arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of a wait table registered with `Memory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitTableId(pub(crate) u32);

/// The cells behind one page: a block and the index of the page's first cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSource {
    pub block: BlockId,
    pub base: usize,
}

impl PageSource {
    /// Cell index within the block for an address inside this page.
    #[must_use]
    pub const fn cell_index(&self, addr: u16) -> usize {
        self.base + (addr & PAGE_MASK) as usize
    }
}

/// One slot of the page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub read: PageSource,
    pub write: PageSource,
    /// Receives a mirrored copy of every write.
    pub shadow: Option<PageSource>,
    /// Wait table consulted for `WAIT` cells in this page.
    pub wait: Option<WaitTableId>,
}

/// Displaced page entries, returned by `Memory::map` and consumed by
/// `Memory::unmap` to put them back.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "dropping a Mapping makes the displaced pages unrecoverable"]
pub struct Mapping {
    pub(crate) first_page: usize,
    pub(crate) saved: Vec<Page>,
}

impl Mapping {
    /// First address covered by the mapping.
    #[must_use]
    pub fn start(&self) -> u16 {
        (self.first_page << PAGE_BITS) as u16
    }

    /// Length of the mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.saved.len() * PAGE_SIZE
    }

    /// Always false: mappings cover at least one page.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }
}

/// Fixed array of page slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTable {
    pages: [Page; PAGE_COUNT],
}

impl PageTable {
    /// A table with every slot set to `page`.
    #[must_use]
    pub fn filled(page: Page) -> Self {
        Self {
            pages: [page; PAGE_COUNT],
        }
    }

    /// Page slot for an address.
    #[inline]
    #[must_use]
    pub fn page(&self, addr: u16) -> &Page {
        &self.pages[(addr >> PAGE_BITS) as usize]
    }

    /// Page slot by index.
    #[must_use]
    pub fn slot(&self, index: usize) -> &Page {
        &self.pages[index]
    }

    /// All slots, lowest address first.
    #[must_use]
    pub fn slots(&self) -> &[Page] {
        &self.pages
    }

    /// Replace `pages.len()` slots starting at `first`, returning the old ones.
    pub(crate) fn replace(&mut self, first: usize, pages: &[Page]) -> Vec<Page> {
        let range = first..first + pages.len();
        let saved = self.pages[range.clone()].to_vec();
        self.pages[range].copy_from_slice(pages);
        saved
    }

    /// True if any slot reads, writes or shadows into `block`.
    #[must_use]
    pub fn references(&self, block: BlockId) -> bool {
        self.pages.iter().any(|p| {
            p.read.block == block
                || p.write.block == block
                || p.shadow.is_some_and(|s| s.block == block)
        })
    }
}

/// Assert that `start`/`len` describe a whole number of pages inside 64K.
///
/// # Panics
///
/// Panics on a misaligned or out-of-range request. Page granularity is a
/// build-time property of the emulated hardware, so this is a programming
/// error rather than a runtime condition.
pub(crate) fn check_page_range(start: u16, len: usize) -> (usize, usize) {
    assert!(len > 0, "page mapping must cover at least one page");
    assert!(
        start & PAGE_MASK == 0,
        "page mapping start ${start:04X} is not aligned to {PAGE_SIZE} bytes"
    );
    assert!(
        len.is_multiple_of(PAGE_SIZE),
        "page mapping length {len} is not a multiple of {PAGE_SIZE}"
    );
    let first = (start >> PAGE_BITS) as usize;
    let count = len / PAGE_SIZE;
    assert!(
        first + count <= PAGE_COUNT,
        "page mapping ${start:04X}+{len} runs past the end of the address space"
    );
    (first, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(block: u32) -> Page {
        let source = PageSource {
            block: BlockId(block),
            base: 0,
        };
        Page {
            read: source,
            write: source,
            shadow: None,
            wait: None,
        }
    }

    #[test]
    fn address_selects_page_by_high_bits() {
        let mut table = PageTable::filled(page(0));
        let _ = table.replace(1, &[page(7)]);
        assert_eq!(table.page(0x03FF).read.block, BlockId(0));
        assert_eq!(table.page(0x0400).read.block, BlockId(7));
        assert_eq!(table.page(0x07FF).read.block, BlockId(7));
        assert_eq!(table.page(0x0800).read.block, BlockId(0));
    }

    #[test]
    fn cell_index_adds_offset_within_page() {
        let source = PageSource {
            block: BlockId(3),
            base: 0x2000,
        };
        assert_eq!(source.cell_index(0x4C05), 0x2000 + 0x005);
    }

    #[test]
    fn references_sees_shadow_targets() {
        let mut shadowed = page(2);
        shadowed.shadow = Some(PageSource {
            block: BlockId(9),
            base: 0,
        });
        let mut table = PageTable::filled(page(2));
        let _ = table.replace(10, &[shadowed]);
        assert!(table.references(BlockId(9)));
        assert!(!table.references(BlockId(8)));
    }

    #[test]
    #[should_panic(expected = "not aligned")]
    fn misaligned_start_panics() {
        check_page_range(0x0001, PAGE_SIZE);
    }

    #[test]
    #[should_panic(expected = "multiple")]
    fn partial_page_length_panics() {
        check_page_range(0x0000, PAGE_SIZE + 1);
    }

    #[test]
    #[should_panic(expected = "past the end")]
    fn overlong_range_panics() {
        check_page_range(0xFC00, 2 * PAGE_SIZE);
    }
}
