//! Ordered flush scheduler
//!
//! Pushes buffered slots to an append-only backing store strictly in offset
//! order. Each pass scans every slot for the one starting at the write
//! cursor; passes repeat while the previous one flushed something, since a
//! flush can expose the next offset's slot as the new frontier.

use crate::error::{PoolError, PoolResult};
use crate::pool::BufferPool;
use std::io::Write;
use tracing::{debug, error};

/// Append-only destination for flushed bytes
///
/// `append` writes at the store's own cursor and returns how many bytes it
/// accepted. Anything short of the full slice is a fatal error for the
/// transfer.
pub trait AppendSink {
    fn append(&mut self, bytes: &[u8]) -> std::io::Result<usize>;
}

impl<W: Write + ?Sized> AppendSink for W {
    fn append(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        self.write(bytes)
    }
}

/// Tracks the write cursor and drains contiguous slots into a sink
#[derive(Debug, Default, Clone)]
pub struct FlushScheduler {
    write_cursor: u64,
    flushed_chunks: u64,
}

impl FlushScheduler {
    pub const fn new() -> Self {
        Self {
            write_cursor: 0,
            flushed_chunks: 0,
        }
    }

    /// Start from a cursor other than zero, e.g. when resuming into an existing object
    pub const fn starting_at(write_cursor: u64) -> Self {
        Self {
            write_cursor,
            flushed_chunks: 0,
        }
    }

    /// Offset of the first byte not yet pushed to the sink
    pub const fn write_cursor(&self) -> u64 {
        self.write_cursor
    }

    /// Chunks flushed over the scheduler's lifetime
    pub const fn flushed_chunks(&self) -> u64 {
        self.flushed_chunks
    }

    /// Flush every slot reachable from the write cursor, returning how many were flushed
    pub fn drain<S>(&mut self, pool: &mut BufferPool, sink: &mut S) -> PoolResult<usize>
    where
        S: AppendSink + ?Sized,
    {
        let mut flushed = 0;
        loop {
            let mut wrote_something = false;
            for slot in 0..pool.buffer_count() {
                let Some(meta) = pool.slot(slot) else {
                    continue;
                };
                if !meta.occupied || meta.source_offset != self.write_cursor {
                    continue;
                }

                let offset = self.write_cursor;
                let bytes = pool.read_slot(slot)?;
                let requested = bytes.len();
                debug!("WRITE {} bytes at offset {} from buffer {}", requested, offset, slot);

                let accepted = sink.append(bytes).map_err(|source| {
                    error!("Write into backing store failed at offset {}: {}", offset, source);
                    PoolError::Append { offset, source }
                })?;
                if accepted != requested {
                    error!(
                        "Short write into backing store at offset {}: {} of {} bytes",
                        offset, accepted, requested
                    );
                    return Err(PoolError::ShortAppend {
                        offset,
                        requested,
                        accepted,
                    });
                }

                pool.release_slot(slot);
                self.write_cursor += accepted as u64;
                self.flushed_chunks += 1;
                flushed += 1;
                wrote_something = true;
            }
            if !wrote_something {
                return Ok(flushed);
            }
        }
    }
}
