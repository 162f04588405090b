//! Backing storage for slot contents
//!
//! An [`Arena`] is a growable byte region addressed by slot index. It lives
//! either on the heap ([`MemoryArena`]) or in a memory-mapped temp file
//! ([`FileArena`]); the pool only cares which one at transition time.

use crate::error::{PoolError, PoolResult};
use crate::pool::BufferMode;
use crate::slot::SlotLayout;
use crate::spill::FileArena;
use std::ops::Range;

/// Resolve the byte range for `len` bytes of `slot` in an arena of `slots` slots
pub(crate) fn slot_range(
    layout: SlotLayout,
    slot: usize,
    len: usize,
    slots: usize,
) -> PoolResult<Range<usize>> {
    if slot >= slots {
        return Err(PoolError::SlotOutOfRange { slot, slots });
    }
    if len > layout.block_size() {
        return Err(PoolError::InvalidChunk {
            offset: layout.file_offset(slot).unwrap_or(u64::MAX),
            reason: format!(
                "{len} bytes do not fit a {} byte slot",
                layout.block_size()
            ),
        });
    }
    let span = layout
        .span(slot)
        .ok_or(PoolError::SlotOutOfRange { slot, slots })?;
    Ok(span.start..span.start + len)
}

/// Heap-resident arena
#[derive(Debug)]
pub struct MemoryArena {
    layout: SlotLayout,
    data: Vec<u8>,
    slots: usize,
}

impl MemoryArena {
    /// An arena with no slots; does not allocate
    pub const fn empty(layout: SlotLayout) -> Self {
        Self {
            layout,
            data: Vec::new(),
            slots: 0,
        }
    }

    /// Allocate a zeroed arena of `slots` slots
    pub fn with_slots(layout: SlotLayout, slots: usize) -> PoolResult<Self> {
        let mut arena = Self::empty(layout);
        arena.resize(slots)?;
        Ok(arena)
    }

    pub const fn slots(&self) -> usize {
        self.slots
    }

    /// The whole arena, `slots * block_size` bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Overwrite the start of the arena with `bytes`
    pub fn copy_from(&mut self, bytes: &[u8]) -> PoolResult<()> {
        let dst = self
            .data
            .get_mut(..bytes.len())
            .ok_or(PoolError::Allocation { bytes: bytes.len() })?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    pub fn read(&self, slot: usize, len: usize) -> PoolResult<&[u8]> {
        let range = slot_range(self.layout, slot, len, self.slots)?;
        Ok(&self.data[range])
    }

    pub fn write(&mut self, slot: usize, bytes: &[u8]) -> PoolResult<()> {
        let range = slot_range(self.layout, slot, bytes.len(), self.slots)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Grow or shrink to `slots` slots; new slots are zeroed
    pub fn resize(&mut self, slots: usize) -> PoolResult<()> {
        let bytes = self
            .layout
            .bytes_for(slots)
            .ok_or(PoolError::Allocation { bytes: usize::MAX })?;
        if bytes > self.data.len() {
            self.data
                .try_reserve_exact(bytes - self.data.len())
                .map_err(|_| PoolError::Allocation { bytes })?;
            self.data.resize(bytes, 0);
        } else {
            self.data.truncate(bytes);
            self.data.shrink_to_fit();
        }
        self.slots = slots;
        Ok(())
    }
}

/// The live representation of a pool's slot bytes
#[derive(Debug)]
pub enum Arena {
    Memory(MemoryArena),
    File(FileArena),
}

impl Arena {
    pub const fn mode(&self) -> BufferMode {
        match self {
            Self::Memory(_) => BufferMode::Memory,
            Self::File(_) => BufferMode::File,
        }
    }

    pub const fn slots(&self) -> usize {
        match self {
            Self::Memory(arena) => arena.slots(),
            Self::File(arena) => arena.slots(),
        }
    }

    /// First `len` bytes of `slot`
    pub fn read(&self, slot: usize, len: usize) -> PoolResult<&[u8]> {
        match self {
            Self::Memory(arena) => arena.read(slot, len),
            Self::File(arena) => arena.read(slot, len),
        }
    }

    /// Overwrite the start of `slot` with `bytes`
    pub fn write(&mut self, slot: usize, bytes: &[u8]) -> PoolResult<()> {
        match self {
            Self::Memory(arena) => arena.write(slot, bytes),
            Self::File(arena) => arena.write(slot, bytes),
        }
    }

    /// Add one slot at the end holding `payload`, returning its index
    pub fn push(&mut self, payload: &[u8]) -> PoolResult<usize> {
        match self {
            Self::Memory(arena) => {
                let slot = arena.slots();
                arena.resize(slot + 1)?;
                if let Err(e) = arena.write(slot, payload) {
                    arena.resize(slot)?;
                    return Err(e);
                }
                Ok(slot)
            }
            Self::File(arena) => arena.append(payload),
        }
    }

    /// Drop trailing slots so that `slots` remain
    pub fn shrink(&mut self, slots: usize) -> PoolResult<()> {
        match self {
            Self::Memory(arena) => arena.resize(slots),
            Self::File(arena) => arena.truncate(slots),
        }
    }

    /// Free the representation; for a file arena this unmaps and deletes the file
    pub fn release(self) {
        match self {
            Self::Memory(_) => {}
            Self::File(arena) => arena.release(),
        }
    }
}
