//! File-backed arena over a memory-mapped temp file
//!
//! The mapping is sized once, at creation, to the file-mode ceiling
//! (`max_file_slots * block_size`) and is never remapped. Only the file
//! underneath grows and shrinks; the arena never touches mapped bytes past
//! the current end of the file.
//!
//! # File Layout
//!
//! ```text
//! +------------------+  0
//! | Slot 0           |  block_size bytes
//! | Slot 1           |  block_size bytes
//! | ...              |
//! | Slot N-1         |  block_size bytes
//! +------------------+  N * block_size  (file length)
//! | (mapped, absent) |  up to max_file_slots * block_size
//! +------------------+
//! ```

use crate::arena::slot_range;
use crate::error::{PoolError, PoolResult};
use crate::slot::SlotLayout;
use memmap2::{MmapMut, MmapOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Name prefix of spill files; a random suffix makes each unique
pub const SPILL_FILE_PREFIX: &str = "spool-buffer-";

/// Length of the random suffix
const SPILL_SUFFIX_LEN: usize = 6;

/// Slot arena stored in a memory-mapped temp file
#[derive(Debug)]
pub struct FileArena {
    layout: SlotLayout,
    // Declared before `file` so the view is unmapped before the file is removed
    map: MmapMut,
    file: NamedTempFile,
    slots: usize,
    capacity: usize,
}

impl FileArena {
    /// Create a spill file in `dir` holding `slots` zeroed slots, mapped for
    /// up to `capacity` slots
    pub fn create(dir: &Path, layout: SlotLayout, slots: usize, capacity: usize) -> PoolResult<Self> {
        let map_bytes = layout
            .bytes_for(capacity)
            .ok_or(PoolError::Allocation { bytes: usize::MAX })?;
        let file_bytes = layout
            .bytes_for(slots.min(capacity))
            .ok_or(PoolError::Allocation { bytes: usize::MAX })?;

        let file = tempfile::Builder::new()
            .prefix(SPILL_FILE_PREFIX)
            .rand_bytes(SPILL_SUFFIX_LEN)
            .tempfile_in(dir)
            .map_err(|source| PoolError::SpillCreate {
                dir: dir.to_path_buf(),
                source,
            })?;
        info!("Created file buffer {}", file.path().display());

        // Dropping `file` on any early return below removes it from disk.
        file.as_file()
            .set_len(file_bytes as u64)
            .map_err(|source| {
                warn!("Failed to initialize backing file {}", file.path().display());
                PoolError::SpillWrite {
                    action: "initialize",
                    source,
                }
            })?;

        // SAFETY: the file is private to this arena (random name, never shared)
        // and only the first `slots * block_size` bytes of the view, which the
        // file always covers, are ever accessed.
        #[allow(unsafe_code)]
        let map = unsafe { MmapOptions::new().len(map_bytes).map_mut(file.as_file()) }.map_err(
            |source| {
                warn!(
                    "Error mmapping the file buffer ({map_bytes} bytes), removing {}",
                    file.path().display()
                );
                PoolError::Mapping {
                    bytes: map_bytes,
                    source,
                }
            },
        )?;

        Ok(Self {
            layout,
            map,
            file,
            slots: slots.min(capacity),
            capacity,
        })
    }

    /// Number of slots currently backed by the file
    pub const fn slots(&self) -> usize {
        self.slots
    }

    /// Number of slots the mapping can address
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Path of the spill file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// File length as reported by the filesystem
    pub fn file_len(&self) -> PoolResult<u64> {
        self.file
            .as_file()
            .metadata()
            .map(|m| m.len())
            .map_err(|source| PoolError::SpillWrite {
                action: "stat",
                source,
            })
    }

    /// The live part of the mapping, `slots * block_size` bytes
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.layout.bytes_for(self.slots).unwrap_or(0);
        &self.map[..len]
    }

    /// Overwrite the start of the live region with `bytes`
    pub fn copy_from(&mut self, bytes: &[u8]) -> PoolResult<()> {
        let live = self.layout.bytes_for(self.slots).unwrap_or(0);
        if bytes.len() > live {
            return Err(PoolError::SlotOutOfRange {
                slot: bytes.len().div_ceil(self.layout.block_size()),
                slots: self.slots,
            });
        }
        self.map[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read(&self, slot: usize, len: usize) -> PoolResult<&[u8]> {
        let range = slot_range(self.layout, slot, len, self.slots)?;
        Ok(&self.map[range])
    }

    pub fn write(&mut self, slot: usize, bytes: &[u8]) -> PoolResult<()> {
        let range = slot_range(self.layout, slot, bytes.len(), self.slots)?;
        self.map[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Extend the file by one slot holding `payload`, zero-padded to a whole block
    ///
    /// The bytes go through the file rather than the view; the shared mapping
    /// already covers the region, so they are visible through it once written.
    pub fn append(&mut self, payload: &[u8]) -> PoolResult<usize> {
        let slot = self.slots;
        if slot >= self.capacity {
            return Err(PoolError::SlotOutOfRange {
                slot,
                slots: self.capacity,
            });
        }
        if payload.len() > self.layout.block_size() {
            return Err(PoolError::InvalidChunk {
                offset: self.layout.file_offset(slot).unwrap_or(u64::MAX),
                reason: format!(
                    "{} bytes do not fit a {} byte slot",
                    payload.len(),
                    self.layout.block_size()
                ),
            });
        }
        let offset = self
            .layout
            .file_offset(slot)
            .ok_or(PoolError::SlotOutOfRange {
                slot,
                slots: self.capacity,
            })?;

        let extend = |source| PoolError::SpillWrite {
            action: "extend",
            source,
        };
        self.file.seek(SeekFrom::Start(offset)).map_err(extend)?;
        self.file.write_all(payload).map_err(extend)?;
        let padding = self.layout.block_size() - payload.len();
        if padding > 0 {
            self.file.write_all(&vec![0u8; padding]).map_err(extend)?;
        }

        self.slots += 1;
        Ok(slot)
    }

    /// Truncate the file to `slots` slots and leave the file cursor at its end
    ///
    /// The mapping keeps its original size.
    pub fn truncate(&mut self, slots: usize) -> PoolResult<()> {
        let slots = slots.min(self.slots);
        let bytes = self
            .layout
            .bytes_for(slots)
            .ok_or(PoolError::Allocation { bytes: usize::MAX })?;
        self.file
            .as_file()
            .set_len(bytes as u64)
            .map_err(|source| PoolError::SpillWrite {
                action: "truncate",
                source,
            })?;
        self.file
            .seek(SeekFrom::End(0))
            .map_err(|source| PoolError::SpillWrite {
                action: "truncate",
                source,
            })?;
        self.slots = slots;
        Ok(())
    }

    /// Unmap and delete the spill file
    pub fn release(self) {
        let Self { map, file, .. } = self;
        drop(map);
        let path = file.path().to_path_buf();
        info!("Removing file buffer {}", path.display());
        if let Err(e) = file.close() {
            warn!("Failed to remove file buffer {}: {}", path.display(), e);
        }
    }
}

/// Creates the file arena a pool spills into
///
/// The pool calls this once per memory-to-file transition.
pub trait SpillFactory: Send {
    fn create(&self, layout: SlotLayout, slots: usize, capacity: usize) -> PoolResult<FileArena>;
}

/// Spills into a temp file under a directory
#[derive(Debug, Clone)]
pub struct TempDirSpill {
    dir: PathBuf,
}

impl TempDirSpill {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SpillFactory for TempDirSpill {
    fn create(&self, layout: SlotLayout, slots: usize, capacity: usize) -> PoolResult<FileArena> {
        FileArena::create(&self.dir, layout, slots, capacity)
    }
}
