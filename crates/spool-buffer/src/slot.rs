//! Slot metadata table and slot addressing
//!
//! Slots are addressed purely by index. [`SlotLayout`] maps an index to the
//! byte range it occupies in an arena; [`SlotTable`] records what each slot
//! currently holds.

use std::ops::Range;

/// Maps slot indices to byte ranges in a flat arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    block_size: usize,
}

impl SlotLayout {
    /// Create a layout for the given block size
    pub const fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    /// Bytes per slot
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Arena bytes needed to hold `slots` slots
    pub const fn bytes_for(&self, slots: usize) -> Option<usize> {
        slots.checked_mul(self.block_size)
    }

    /// Byte range of `slot`, or `None` if it would overflow
    pub fn span(&self, slot: usize) -> Option<Range<usize>> {
        let start = slot.checked_mul(self.block_size)?;
        let end = start.checked_add(self.block_size)?;
        Some(start..end)
    }

    /// Byte offset of `slot` as a file position
    pub fn file_offset(&self, slot: usize) -> Option<u64> {
        self.span(slot).map(|span| span.start as u64)
    }
}

/// Metadata for one slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotMeta {
    /// Bytes actually written, at most the block size
    pub length: usize,
    /// Offset of these bytes in the overall transfer
    pub source_offset: u64,
    /// Whether the bytes are payload pending flush
    pub occupied: bool,
}

impl SlotMeta {
    /// Metadata for a freshly filled slot
    pub const fn filled(source_offset: u64, length: usize) -> Self {
        Self {
            length,
            source_offset,
            occupied: true,
        }
    }
}

/// Per-slot metadata, always resized as a unit
#[derive(Debug, Default, Clone)]
pub struct SlotTable {
    slots: Vec<SlotMeta>,
}

impl SlotTable {
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<SlotMeta> {
        self.slots.get(slot).copied()
    }

    /// Lowest-indexed free slot
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|meta| !meta.occupied)
    }

    /// Highest-indexed occupied slot
    pub fn last_occupied(&self) -> Option<usize> {
        self.slots.iter().rposition(|meta| meta.occupied)
    }

    /// Number of occupied slots
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|meta| meta.occupied).count()
    }

    /// Sum of lengths of occupied slots
    pub fn pending_bytes(&self) -> u64 {
        self.slots
            .iter()
            .filter(|meta| meta.occupied)
            .map(|meta| meta.length as u64)
            .sum()
    }

    /// Mark `slot` as holding `length` bytes from `source_offset`
    pub fn fill(&mut self, slot: usize, source_offset: u64, length: usize) -> bool {
        match self.slots.get_mut(slot) {
            Some(meta) => {
                *meta = SlotMeta::filled(source_offset, length);
                true
            }
            None => false,
        }
    }

    /// Mark `slot` as free; its bytes become ignorable
    pub fn release(&mut self, slot: usize) -> bool {
        match self.slots.get_mut(slot) {
            Some(meta) => {
                meta.occupied = false;
                true
            }
            None => false,
        }
    }

    /// Append an occupied slot at the end of the table
    pub fn push_filled(&mut self, source_offset: u64, length: usize) -> usize {
        self.slots.push(SlotMeta::filled(source_offset, length));
        self.slots.len() - 1
    }

    /// Drop every slot from index `len` onwards
    pub fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
        self.slots.shrink_to_fit();
    }
}
