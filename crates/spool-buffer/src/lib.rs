//! Spool Buffer - out-of-order write buffering
//!
//! Sits between a transfer endpoint that delivers byte ranges in any order
//! (parallel or striped streams finish out of sequence) and a backing store
//! that only accepts strictly sequential appends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Transport     │  store(offset, payload) per chunk
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │   BufferPool    │  slot table + arena
//! │  - SlotTable    │  memory ──spill──▶ mmap'd temp file
//! │  - Arena        │  memory ◀─restore── mmap'd temp file
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ FlushScheduler  │  drains the contiguous run at the write cursor
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  AppendSink     │  append-only backing store
//! └─────────────────┘
//! ```
//!
//! A [`Transfer`] ties one pool, one scheduler and one sink together;
//! [`SharedTransfer`] puts it behind a mutex for multi-threaded transports.

pub mod arena;
pub mod error;
pub mod flush;
pub mod pool;
pub mod slot;
pub mod spill;
pub mod transfer;

pub use arena::{Arena, MemoryArena};
pub use error::{FailureKind, PoolError, PoolResult};
pub use flush::{AppendSink, FlushScheduler};
pub use pool::{BufferMode, BufferPool, PoolStats};
pub use slot::{SlotLayout, SlotMeta, SlotTable};
pub use spill::{FileArena, SpillFactory, TempDirSpill, SPILL_FILE_PREFIX};
pub use transfer::{SharedTransfer, Transfer, TransferState};

pub use spool_common::SpoolConfig;
