//! Memory model and timing contracts shared by every machine.
//!
//! Memory is a set of blocks of [`Cell`]s seen by the CPU through a
//! [`PageTable`]. The per-model video timing plugs in through
//! [`VideoTiming`]. Everything counts in CPU clock cycles.

mod cell;
mod clock;
mod error;
mod memory;
mod observable;
mod page_table;
mod video;

pub use cell::{Cell, CellFlags};
pub use clock::MasterClock;
pub use error::MemoryImageError;
pub use memory::{Access, BlockImage, Memory, MemoryBlock, MemoryImage, Source};
pub use observable::{Observable, Value};
pub use page_table::{
    BlockId, Mapping, PAGE_BITS, PAGE_COUNT, PAGE_MASK, PAGE_SIZE, Page, PageSource, PageTable,
    WaitTableId,
};
pub use video::{MAX_INSTRUCTION_CYCLES, VideoCounters, VideoTiming};
