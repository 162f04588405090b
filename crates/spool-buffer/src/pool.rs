//! Buffer pool manager
//!
//! Owns the slot table and the arena together. Every [`BufferPool::store`]
//! first settles the representation (memory or spill file) from the current
//! slot count, then places the chunk in the lowest free slot or grows the
//! pool by one, then trims idle trailing slots.

use crate::arena::{Arena, MemoryArena};
use crate::error::{PoolError, PoolResult};
use crate::slot::{SlotLayout, SlotMeta, SlotTable};
use crate::spill::{SpillFactory, TempDirSpill};
use spool_common::SpoolConfig;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Where slot bytes currently live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    Memory,
    File,
}

impl fmt::Display for BufferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::File => write!(f, "file-backed"),
        }
    }
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub mode: BufferMode,
    pub buffer_count: usize,
    pub occupied: usize,
    pub pending_bytes: u64,
    /// Largest `buffer_count` seen
    pub peak_buffer_count: usize,
    pub spills: u64,
    pub restores: u64,
    pub trims: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    peak_buffer_count: usize,
    spills: u64,
    restores: u64,
    trims: u64,
}

/// Slot pool for one transfer
pub struct BufferPool {
    config: SpoolConfig,
    layout: SlotLayout,
    slots: SlotTable,
    arena: Arena,
    spill: Box<dyn SpillFactory>,
    counters: Counters,
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("block_size", &self.layout.block_size())
            .field("mode", &self.mode())
            .field("buffer_count", &self.buffer_count())
            .field("occupied", &self.slots.occupied())
            .finish_non_exhaustive()
    }
}

impl BufferPool {
    /// Create an empty, memory-resident pool that spills under `config.spill_dir()`
    pub fn new(config: SpoolConfig) -> PoolResult<Self> {
        let spill = TempDirSpill::new(config.spill_dir());
        Self::with_spill(config, Box::new(spill))
    }

    /// Create an empty pool with a custom spill factory
    pub fn with_spill(config: SpoolConfig, spill: Box<dyn SpillFactory>) -> PoolResult<Self> {
        config.validate()?;
        let layout = SlotLayout::new(config.block_size);
        Ok(Self {
            config,
            layout,
            slots: SlotTable::new(),
            arena: Arena::Memory(MemoryArena::empty(layout)),
            spill,
            counters: Counters::default(),
        })
    }

    pub const fn config(&self) -> &SpoolConfig {
        &self.config
    }

    pub const fn block_size(&self) -> usize {
        self.layout.block_size()
    }

    pub const fn mode(&self) -> BufferMode {
        self.arena.mode()
    }

    /// Current slot count
    pub fn buffer_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots holding unflushed payload
    pub fn occupied(&self) -> usize {
        self.slots.occupied()
    }

    pub fn slot(&self, slot: usize) -> Option<SlotMeta> {
        self.slots.get(slot)
    }

    /// Payload bytes of an occupied slot
    pub fn read_slot(&self, slot: usize) -> PoolResult<&[u8]> {
        let meta = self.slots.get(slot).ok_or(PoolError::SlotOutOfRange {
            slot,
            slots: self.slots.len(),
        })?;
        self.arena.read(slot, meta.length)
    }

    /// Mark a slot free after its bytes were flushed
    pub fn release_slot(&mut self, slot: usize) -> bool {
        self.slots.release(slot)
    }

    /// Path of the spill file while in file mode
    pub fn spill_path(&self) -> Option<&Path> {
        match &self.arena {
            Arena::File(arena) => Some(arena.path()),
            Arena::Memory(_) => None,
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            mode: self.mode(),
            buffer_count: self.buffer_count(),
            occupied: self.slots.occupied(),
            pending_bytes: self.slots.pending_bytes(),
            peak_buffer_count: self.counters.peak_buffer_count,
            spills: self.counters.spills,
            restores: self.counters.restores,
            trims: self.counters.trims,
        }
    }

    /// Whether the pool should be file-backed at its current size
    pub fn should_use_file_backing(&self) -> bool {
        if !self.config.file_spill {
            return false;
        }
        let count = self.buffer_count();
        if count >= self.config.max_memory_slots.saturating_sub(1) {
            return true;
        }
        self.mode() == BufferMode::File
            && count > self.config.max_memory_slots / self.config.hysteresis_divisor
    }

    /// Buffer one chunk, returning the slot it landed in
    ///
    /// Empty payloads are accepted and ignored. Any error other than
    /// [`PoolError::InvalidChunk`] is fatal to the transfer; slots stored
    /// before the failure are left intact.
    pub fn store(&mut self, source_offset: u64, payload: &[u8]) -> PoolResult<Option<usize>> {
        if payload.len() > self.layout.block_size() {
            return Err(PoolError::InvalidChunk {
                offset: source_offset,
                reason: format!(
                    "{} bytes exceed the {} byte block size",
                    payload.len(),
                    self.layout.block_size()
                ),
            });
        }
        if payload.is_empty() {
            return Ok(None);
        }

        self.settle_mode()?;

        let slot = match self.slots.first_free() {
            Some(slot) => {
                self.arena.write(slot, payload)?;
                self.slots.fill(slot, source_offset, payload.len());
                debug!(
                    "Stored {} bytes in buffer {}; offset {}",
                    payload.len(),
                    slot,
                    source_offset
                );
                slot
            }
            None => self.grow(source_offset, payload)?,
        };

        self.trim_idle()?;
        debug_assert_eq!(self.slots.len(), self.arena.slots());
        Ok(Some(slot))
    }

    /// Release the arena and, in file mode, delete the spill file
    pub fn close(self) {
        let Self { arena, .. } = self;
        arena.release();
    }

    fn settle_mode(&mut self) -> PoolResult<()> {
        let use_file = self.should_use_file_backing();
        match (use_file, self.mode()) {
            (true, BufferMode::Memory) => self.spill_to_file(),
            (true, BufferMode::File) => Ok(()),
            (false, BufferMode::File) if self.buffer_count() < self.config.max_memory_slots => {
                self.restore_to_memory()
            }
            _ => Ok(()),
        }
    }

    fn spill_to_file(&mut self) -> PoolResult<()> {
        let Arena::Memory(memory) = &self.arena else {
            return Ok(());
        };
        info!("Switching from memory buffer to file buffer");
        let mut file = self
            .spill
            .create(self.layout, memory.slots(), self.config.max_file_slots)
            .inspect_err(|e| warn!("Failed to set up file buffer: {}", e))?;
        if let Err(e) = file.copy_from(memory.as_bytes()) {
            file.release();
            return Err(e);
        }
        info!("Memory buffers copied to disk buffer");

        let old = std::mem::replace(&mut self.arena, Arena::File(file));
        old.release();
        self.counters.spills += 1;
        Ok(())
    }

    fn restore_to_memory(&mut self) -> PoolResult<()> {
        let Arena::File(file) = &self.arena else {
            return Ok(());
        };
        info!("Switching from file buffer to memory buffer");
        let mut memory = MemoryArena::with_slots(self.layout, file.slots())?;
        memory.copy_from(file.as_bytes())?;

        let old = std::mem::replace(&mut self.arena, Arena::Memory(memory));
        old.release();
        self.counters.restores += 1;
        Ok(())
    }

    /// No free slot: add one at the end, up to the ceiling of the current mode
    fn grow(&mut self, source_offset: u64, payload: &[u8]) -> PoolResult<usize> {
        let new_count = self.buffer_count() + 1;
        info!("Initializing buffer number {}", new_count);

        // Memory mode only meets its ceiling with spill disabled, where all
        // `max_memory_slots` slots are usable; the file pool stops one short
        let mode = self.mode();
        let (ceiling, exhausted) = match mode {
            BufferMode::Memory => (
                self.config.max_memory_slots,
                new_count > self.config.max_memory_slots,
            ),
            BufferMode::File => (
                self.config.max_file_slots,
                new_count >= self.config.max_file_slots,
            ),
        };
        if exhausted {
            let err = PoolError::capacity_exhausted(mode, ceiling);
            warn!("Failed to store data into buffer: {}", err);
            return Err(err);
        }

        let slot = self.arena.push(payload)?;
        let meta_slot = self.slots.push_filled(source_offset, payload.len());
        debug_assert_eq!(slot, meta_slot);

        self.counters.peak_buffer_count = self.counters.peak_buffer_count.max(new_count);
        Ok(slot)
    }

    fn trim_idle(&mut self) -> PoolResult<()> {
        if self.slots.is_empty() {
            return Ok(());
        }
        let count = self.buffer_count();
        let keep = self.slots.last_occupied().map_or(0, |slot| slot + 1);
        let idle = count - keep;
        debug!("There are {} extra buffers", idle);

        if idle > self.config.idle_trim_slots {
            info!(
                "About to deallocate {} buffers; {} will be left",
                idle, keep
            );
            self.arena.shrink(keep)?;
            self.slots.truncate(keep);
            self.counters.trims += 1;
        }
        Ok(())
    }
}

/// Spill factory that always fails; used where file spill must be unavailable
#[cfg(test)]
pub(crate) struct FailingSpill;

#[cfg(test)]
impl SpillFactory for FailingSpill {
    fn create(&self, _: SlotLayout, _: usize, _: usize) -> PoolResult<crate::spill::FileArena> {
        Err(PoolError::Mapping {
            bytes: 0,
            source: std::io::Error::from(std::io::ErrorKind::OutOfMemory),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn config(dir: &Path, block_size: usize, max_memory: usize, max_file: usize) -> SpoolConfig {
        SpoolConfig::new(block_size, max_memory, max_file).with_temp_dir(dir)
    }

    fn occupied_slots(pool: &BufferPool) -> Vec<(u64, Vec<u8>)> {
        let mut out: Vec<_> = (0..pool.buffer_count())
            .filter_map(|i| {
                let meta = pool.slot(i)?;
                meta.occupied
                    .then(|| (meta.source_offset, pool.read_slot(i).unwrap().to_vec()))
            })
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_new_pool_is_empty_memory() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPool::new(config(dir.path(), 4, 100, 100)).unwrap();
        assert_eq!(pool.mode(), BufferMode::Memory);
        assert_eq!(pool.buffer_count(), 0);
        assert!(pool.spill_path().is_none());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = BufferPool::new(SpoolConfig::new(0, 1, 1)).unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));

        // A file pool too small to take over the memory pool
        let err = BufferPool::new(SpoolConfig::new(4, 10, 3)).unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
        assert_eq!(err.kind(), FailureKind::Usage);
    }

    #[test]
    fn test_store_reuses_lowest_free_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::new(config(dir.path(), 4, 100, 100)).unwrap();
        for i in 0..3u64 {
            assert_eq!(pool.store(i * 4, b"abcd").unwrap(), Some(i as usize));
        }
        pool.release_slot(2);
        pool.release_slot(0);

        assert_eq!(pool.store(12, b"wxyz").unwrap(), Some(0));
        assert_eq!(pool.slot(0), Some(SlotMeta::filled(12, 4)));
        assert_eq!(pool.store(16, b"ef").unwrap(), Some(2));
        assert_eq!(pool.read_slot(2).unwrap(), b"ef");
        assert_eq!(pool.buffer_count(), 3);
    }

    #[test]
    fn test_store_rejects_oversized_and_ignores_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::new(config(dir.path(), 4, 100, 100)).unwrap();

        let err = pool.store(0, b"too long").unwrap_err();
        assert_eq!(err.kind(), FailureKind::Usage);
        assert_eq!(pool.store(0, b"").unwrap(), None);
        assert_eq!(pool.buffer_count(), 0);
    }

    #[test]
    fn test_mode_decision_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::new(config(dir.path(), 4, 10, 100)).unwrap();

        for i in 0..8u64 {
            pool.store(i * 4, b"abcd").unwrap();
            assert_eq!(pool.mode(), BufferMode::Memory);
        }
        assert!(!pool.should_use_file_backing());
        pool.store(32, b"abcd").unwrap();
        // nine slots reach max_memory_slots - 1
        assert!(pool.should_use_file_backing());
        pool.store(36, b"abcd").unwrap();
        assert_eq!(pool.mode(), BufferMode::File);
        assert!(pool.spill_path().is_some());
    }

    #[test]
    fn test_scenario_b_spills_instead_of_failing() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::new(config(dir.path(), 4, 3, 16)).unwrap();

        pool.store(0, b"AAAA").unwrap();
        pool.store(4, b"BBBB").unwrap();
        pool.store(8, b"CCCC").unwrap();
        assert_eq!(pool.buffer_count(), 3);

        pool.store(12, b"DDDD").unwrap();
        assert_eq!(pool.mode(), BufferMode::File);
        assert_eq!(pool.buffer_count(), 4);
        assert_eq!(pool.stats().spills, 1);
        assert_eq!(
            occupied_slots(&pool),
            vec![
                (0, b"AAAA".to_vec()),
                (4, b"BBBB".to_vec()),
                (8, b"CCCC".to_vec()),
                (12, b"DDDD".to_vec()),
            ]
        );
    }

    #[test]
    fn test_scenario_c_without_spill_fails_on_third_store() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 4, 2, 16).with_file_spill(false);
        let mut pool = BufferPool::new(cfg).unwrap();

        pool.store(0, b"AAAA").unwrap();
        pool.store(4, b"BBBB").unwrap();
        let err = pool.store(8, b"CCCC").unwrap_err();
        assert_eq!(err.kind(), FailureKind::CapacityExhausted);

        assert_eq!(pool.buffer_count(), 2);
        assert_eq!(pool.mode(), BufferMode::Memory);
        assert_eq!(
            occupied_slots(&pool),
            vec![(0, b"AAAA".to_vec()), (4, b"BBBB".to_vec())]
        );
    }

    #[test]
    fn test_scenario_c_spill_failure_keeps_slots() {
        let cfg = SpoolConfig::new(4, 3, 16);
        let mut pool = BufferPool::with_spill(cfg, Box::new(FailingSpill)).unwrap();

        pool.store(0, b"AAAA").unwrap();
        pool.store(4, b"BBBB").unwrap();
        let err = pool.store(8, b"CCCC").unwrap_err();
        assert_eq!(err.kind(), FailureKind::Mapping);

        assert_eq!(pool.mode(), BufferMode::Memory);
        assert_eq!(
            occupied_slots(&pool),
            vec![(0, b"AAAA".to_vec()), (4, b"BBBB".to_vec())]
        );
    }

    #[test]
    fn test_scenario_c_two_slot_pool_spill_failure() {
        let cfg = SpoolConfig::new(4, 2, 16);
        let mut pool = BufferPool::with_spill(cfg, Box::new(FailingSpill)).unwrap();

        pool.store(0, b"AAAA").unwrap();
        // One slot already reaches max_memory_slots - 1, so this store tries to spill
        let err = pool.store(4, b"BBBB").unwrap_err();
        assert_eq!(err.kind(), FailureKind::Mapping);

        assert_eq!(pool.mode(), BufferMode::Memory);
        assert_eq!(pool.buffer_count(), 1);
        assert_eq!(pool.read_slot(0).unwrap(), b"AAAA");
        assert_eq!(pool.slot(0), Some(SlotMeta::filled(0, 4)));
    }

    #[test]
    fn test_file_ceiling_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::new(config(dir.path(), 4, 2, 4)).unwrap();
        for i in 0..3u64 {
            pool.store(i * 4, b"abcd").unwrap();
        }
        assert_eq!(pool.mode(), BufferMode::File);

        // A fourth slot would bring the count to max_file_slots
        let err = pool.store(12, b"abcd").unwrap_err();
        assert!(matches!(
            err,
            PoolError::CapacityExhausted {
                mode: BufferMode::File,
                ceiling: 4,
                ..
            }
        ));
        assert_eq!(pool.buffer_count(), 3);
        assert_eq!(occupied_slots(&pool).len(), 3);
    }

    #[test]
    fn test_memory_to_file_preserves_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::new(config(dir.path(), 8, 6, 32)).unwrap();

        let chunks: Vec<(u64, Vec<u8>)> = (0..5u64)
            .map(|i| (i * 8, format!("chunk-{i}").into_bytes()))
            .collect();
        for (offset, data) in &chunks {
            pool.store(*offset, data).unwrap();
        }
        assert_eq!(pool.mode(), BufferMode::Memory);
        pool.release_slot(1);
        let before = occupied_slots(&pool);

        // Five slots reach max_memory_slots - 1; this store spills first and
        // then reuses the freed slot 1
        pool.store(40, b"chunk-5").unwrap();
        assert_eq!(pool.mode(), BufferMode::File);
        assert_eq!(pool.buffer_count(), 5);

        let mut expected = before;
        expected.push((40, b"chunk-5".to_vec()));
        expected.sort();
        assert_eq!(occupied_slots(&pool), expected);

        let spill_path = pool.spill_path().unwrap().to_path_buf();
        assert!(spill_path.exists());
        assert_eq!(std::fs::metadata(&spill_path).unwrap().len(), 40);

        pool.close();
        assert!(!spill_path.exists());
    }

    #[test]
    fn test_file_to_memory_transition() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SpoolConfig {
            idle_trim_slots: 1,
            ..config(dir.path(), 4, 6, 32)
        };
        let mut pool = BufferPool::new(cfg).unwrap();

        for i in 0..6u64 {
            pool.store(i * 4, &[b'a' + i as u8; 4]).unwrap();
        }
        assert_eq!(pool.mode(), BufferMode::File);
        let spill_path = pool.spill_path().unwrap().to_path_buf();

        // Flush the tail, keep slots 0 and 1
        for slot in 2..6 {
            pool.release_slot(slot);
        }
        // Lands in slot 2, then the idle tail (slots 3..6) is trimmed
        pool.store(24, b"gggg").unwrap();
        assert_eq!(pool.buffer_count(), 3);
        assert_eq!(pool.mode(), BufferMode::File);

        // 3 slots is not above 6 / 2, so this store goes back to memory
        pool.store(28, b"hhhh").unwrap();
        assert_eq!(pool.mode(), BufferMode::Memory);
        assert!(!spill_path.exists());
        assert_eq!(pool.stats().restores, 1);
        assert_eq!(
            occupied_slots(&pool),
            vec![
                (0, b"aaaa".to_vec()),
                (4, b"bbbb".to_vec()),
                (24, b"gggg".to_vec()),
                (28, b"hhhh".to_vec()),
            ]
        );
    }

    #[test]
    fn test_idle_trim_shrinks_to_last_occupied() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::new(config(dir.path(), 4, 100, 100)).unwrap();
        for i in 0..15u64 {
            pool.store(i * 4, b"abcd").unwrap();
        }
        for slot in 3..15 {
            pool.release_slot(slot);
        }
        pool.release_slot(1);

        // Lands in slot 1; slots 3..15 are twelve idle trailing slots
        pool.store(60, b"wxyz").unwrap();
        assert_eq!(pool.buffer_count(), 3);
        assert_eq!(pool.stats().trims, 1);
        assert_eq!(
            occupied_slots(&pool),
            vec![
                (0, b"abcd".to_vec()),
                (8, b"abcd".to_vec()),
                (60, b"wxyz".to_vec()),
            ]
        );
    }

    #[test]
    fn test_idle_trim_needs_more_than_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::new(config(dir.path(), 4, 100, 100)).unwrap();
        for i in 0..11u64 {
            pool.store(i * 4, b"abcd").unwrap();
        }
        for slot in 0..11 {
            pool.release_slot(slot);
        }

        // Lands in slot 0 leaving exactly ten idle slots: no trim
        pool.store(44, b"abcd").unwrap();
        assert_eq!(pool.buffer_count(), 11);
        assert_eq!(pool.stats().trims, 0);
    }

    #[test]
    fn test_scenario_d_file_truncated_on_trim() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SpoolConfig {
            idle_trim_slots: 2,
            ..config(dir.path(), 4, 4, 64)
        };
        let mut pool = BufferPool::new(cfg).unwrap();
        for i in 0..20u64 {
            pool.store(i * 4, b"abcd").unwrap();
        }
        assert_eq!(pool.mode(), BufferMode::File);
        assert_eq!(pool.buffer_count(), 20);

        for slot in 5..20 {
            pool.release_slot(slot);
        }
        pool.store(80, b"wxyz").unwrap();
        assert_eq!(pool.buffer_count(), 6);
        assert_eq!(pool.mode(), BufferMode::File);

        let path = pool.spill_path().unwrap();
        let len = std::fs::metadata(path).unwrap().len();
        assert_eq!(len, (pool.buffer_count() * pool.block_size()) as u64);
        assert_eq!(pool.read_slot(5).unwrap(), b"wxyz");
    }

    #[test]
    fn test_stats_track_peak() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::new(config(dir.path(), 4, 100, 100)).unwrap();
        for i in 0..5u64 {
            pool.store(i * 4, b"ab").unwrap();
        }
        pool.release_slot(4);

        let stats = pool.stats();
        assert_eq!(stats.peak_buffer_count, 5);
        assert_eq!(stats.buffer_count, 5);
        assert_eq!(stats.occupied, 4);
        assert_eq!(stats.pending_bytes, 8);
        assert_eq!(stats.mode, BufferMode::Memory);
    }
}
