//! Per-transfer wrapper around the pool and the flush scheduler
//!
//! A [`Transfer`] is the single owner of one transfer's pool, sink and write
//! cursor. The first fatal error moves it to [`TransferState::Failed`] and
//! releases the arena (and spill file) immediately; no later call succeeds.
//!
//! Transports that deliver chunks from several threads use
//! [`SharedTransfer`], which serialises the whole surface behind one mutex.

use crate::error::{PoolError, PoolResult};
use crate::flush::{AppendSink, FlushScheduler};
use crate::pool::{BufferPool, PoolStats};
use crate::spill::SpillFactory;
use parking_lot::Mutex;
use spool_common::SpoolConfig;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Lifecycle of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Accepting chunks
    Active,
    /// Every byte up to the cursor reached the sink
    Finished,
    /// Aborted by a fatal error or by the caller
    Failed,
}

/// One transfer: pool, sink and write cursor
pub struct Transfer<S> {
    id: Uuid,
    pool: Option<BufferPool>,
    flush: FlushScheduler,
    sink: S,
    state: TransferState,
}

impl<S: AppendSink> Transfer<S> {
    /// Start a transfer writing into `sink` from offset 0
    pub fn new(config: SpoolConfig, sink: S) -> PoolResult<Self> {
        let pool = BufferPool::new(config)?;
        Ok(Self::from_pool(pool, sink))
    }

    /// Start a transfer with a custom spill factory
    pub fn with_spill(
        config: SpoolConfig,
        spill: Box<dyn SpillFactory>,
        sink: S,
    ) -> PoolResult<Self> {
        let pool = BufferPool::with_spill(config, spill)?;
        Ok(Self::from_pool(pool, sink))
    }

    fn from_pool(pool: BufferPool, sink: S) -> Self {
        let id = Uuid::new_v4();
        info!(
            "Transfer {} started: block size {}, {} memory / {} file buffers",
            id,
            pool.block_size(),
            pool.config().max_memory_slots,
            pool.config().max_file_slots
        );
        Self {
            id,
            pool: Some(pool),
            flush: FlushScheduler::new(),
            sink,
            state: TransferState::Active,
        }
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub const fn state(&self) -> TransferState {
        self.state
    }

    /// Offset of the first byte not yet pushed to the sink
    pub const fn write_cursor(&self) -> u64 {
        self.flush.write_cursor()
    }

    /// The pool, while the transfer is active
    pub const fn pool(&self) -> Option<&BufferPool> {
        self.pool.as_ref()
    }

    pub fn stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(BufferPool::stats)
    }

    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Buffer one chunk without flushing
    ///
    /// Chunks starting before the write cursor were already flushed and are
    /// rejected without failing the transfer.
    pub fn store(&mut self, offset: u64, payload: &[u8]) -> PoolResult<()> {
        let cursor = self.flush.write_cursor();
        let pool = self.active_pool()?;
        if offset < cursor && !payload.is_empty() {
            return Err(PoolError::InvalidChunk {
                offset,
                reason: format!("already flushed up to {cursor}"),
            });
        }
        match pool.store(offset, payload) {
            Ok(_) => Ok(()),
            Err(e) if !e.is_fatal() => Err(e),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Flush every chunk contiguous with the write cursor
    pub fn drain(&mut self) -> PoolResult<usize> {
        let result = match (self.state, self.pool.as_mut()) {
            (TransferState::Active, Some(pool)) => self.flush.drain(pool, &mut self.sink),
            _ => return Err(PoolError::TransferFinished(self.id.to_string())),
        };
        result.map_err(|e| self.fail(e))
    }

    /// Buffer one chunk, then flush whatever became contiguous
    pub fn write_chunk(&mut self, offset: u64, payload: &[u8]) -> PoolResult<usize> {
        self.store(offset, payload)?;
        self.drain()
    }

    /// Flush what remains and close the transfer, returning the bytes written
    ///
    /// Chunks still buffered behind a gap fail the transfer.
    pub fn finish(&mut self) -> PoolResult<u64> {
        self.drain()?;
        let pending = self.pool.as_ref().map_or(0, BufferPool::occupied);
        let cursor = self.flush.write_cursor();
        if pending > 0 {
            return Err(self.fail(PoolError::Incomplete { cursor, pending }));
        }

        if let Some(pool) = self.pool.take() {
            pool.close();
        }
        self.state = TransferState::Finished;
        info!("Transfer {} finished: {} bytes written", self.id, cursor);
        Ok(cursor)
    }

    /// Abort the transfer and release its buffers
    pub fn abort(&mut self) {
        if self.state == TransferState::Active {
            warn!("Transfer {} aborted at offset {}", self.id, self.write_cursor());
            self.release(TransferState::Failed);
        }
    }

    /// Give back the sink
    pub fn into_sink(mut self) -> S {
        if let Some(pool) = self.pool.take() {
            pool.close();
        }
        self.sink
    }

    fn active_pool(&mut self) -> PoolResult<&mut BufferPool> {
        match (self.state, self.pool.as_mut()) {
            (TransferState::Active, Some(pool)) => Ok(pool),
            _ => Err(PoolError::TransferFinished(self.id.to_string())),
        }
    }

    fn fail(&mut self, err: PoolError) -> PoolError {
        error!("Transfer {} failed: {}", self.id, err);
        self.release(TransferState::Failed);
        err
    }

    fn release(&mut self, state: TransferState) {
        if let Some(pool) = self.pool.take() {
            pool.close();
        }
        self.state = state;
    }
}

/// A transfer shared between the threads delivering its chunks
pub struct SharedTransfer<S> {
    inner: Arc<Mutex<Transfer<S>>>,
}

impl<S> Clone for SharedTransfer<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: AppendSink> SharedTransfer<S> {
    pub fn new(transfer: Transfer<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transfer)),
        }
    }

    pub fn store(&self, offset: u64, payload: &[u8]) -> PoolResult<()> {
        self.inner.lock().store(offset, payload)
    }

    pub fn drain(&self) -> PoolResult<usize> {
        self.inner.lock().drain()
    }

    pub fn write_chunk(&self, offset: u64, payload: &[u8]) -> PoolResult<usize> {
        self.inner.lock().write_chunk(offset, payload)
    }

    pub fn finish(&self) -> PoolResult<u64> {
        self.inner.lock().finish()
    }

    pub fn abort(&self) {
        self.inner.lock().abort();
    }

    pub fn state(&self) -> TransferState {
        self.inner.lock().state()
    }

    pub fn write_cursor(&self) -> u64 {
        self.inner.lock().write_cursor()
    }

    pub fn stats(&self) -> Option<PoolStats> {
        self.inner.lock().stats()
    }

    /// Run `f` with the transfer locked
    pub fn with<R>(&self, f: impl FnOnce(&mut Transfer<S>) -> R) -> R {
        f(&mut *self.inner.lock())
    }
}
