//! Buffer pool error types
//!
//! Every variant except [`PoolError::InvalidChunk`] and
//! [`PoolError::TransferFinished`] is fatal to the transfer it was raised in.

use crate::pool::BufferMode;
use std::path::PathBuf;
use thiserror::Error;

/// Broad classification of a pool failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Heap allocation for the arena failed
    Allocation,
    /// The spill file could not be created or mapped
    Mapping,
    /// Extending, truncating or writing the spill file failed
    LocalWrite,
    /// All memory or file slots are in use
    CapacityExhausted,
    /// The backing store rejected or short-wrote a flush
    BackingStore,
    /// The caller handed the pool something it cannot accept
    Usage,
}

/// Buffer pool error
#[derive(Error, Debug)]
pub enum PoolError {
    /// Heap allocation for the arena failed
    #[error("Memory allocation error: could not reserve {bytes} bytes")]
    Allocation { bytes: usize },

    /// The spill file could not be created
    #[error("Failed to create file buffer in {}: {source}", .dir.display())]
    SpillCreate {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The spill file could not be mapped
    #[error("Failed to mmap() the file buffer ({bytes} bytes): {source}")]
    Mapping {
        bytes: usize,
        #[source]
        source: std::io::Error,
    },

    /// A write, extension or truncation of the spill file failed
    #[error("Unable to {action} our file-backed buffers: {source}")]
    SpillWrite {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Growth would exceed the ceiling of the current mode
    #[error("Allocated all {ceiling} {mode} buffers on server {host}; aborting transfer")]
    CapacityExhausted {
        mode: BufferMode,
        ceiling: usize,
        host: String,
    },

    /// The backing store returned an error during a flush
    #[error("Write into backing store failed at offset {offset}: {source}")]
    Append {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    /// The backing store accepted fewer bytes than requested
    #[error("Short write into backing store at offset {offset}: accepted {accepted} of {requested} bytes")]
    ShortAppend {
        offset: u64,
        requested: usize,
        accepted: usize,
    },

    /// Slot index outside the arena
    #[error("Slot {slot} is outside the arena ({slots} slots)")]
    SlotOutOfRange { slot: usize, slots: usize },

    /// A chunk the pool cannot accept
    #[error("Invalid chunk at offset {offset}: {reason}")]
    InvalidChunk { offset: u64, reason: String },

    /// The transfer finished with slots still waiting on a gap
    #[error("Transfer incomplete: cursor stopped at {cursor} with {pending} buffered chunks")]
    Incomplete { cursor: u64, pending: usize },

    /// The transfer already finished or failed
    #[error("Transfer {0} is no longer active")]
    TransferFinished(String),

    /// Bad pool configuration
    #[error("Configuration error: {0}")]
    Config(#[from] spool_common::Error),
}

impl PoolError {
    /// Classify the error
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Allocation { .. } => FailureKind::Allocation,
            Self::SpillCreate { .. } | Self::Mapping { .. } => FailureKind::Mapping,
            Self::SpillWrite { .. } | Self::SlotOutOfRange { .. } => FailureKind::LocalWrite,
            Self::CapacityExhausted { .. } => FailureKind::CapacityExhausted,
            Self::Append { .. } | Self::ShortAppend { .. } | Self::Incomplete { .. } => {
                FailureKind::BackingStore
            }
            Self::InvalidChunk { .. } | Self::TransferFinished(_) | Self::Config(_) => {
                FailureKind::Usage
            }
        }
    }

    /// Whether the error ends the transfer
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidChunk { .. } | Self::TransferFinished(_))
    }

    /// Nothing is retried locally
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        false
    }

    pub(crate) fn capacity_exhausted(mode: BufferMode, ceiling: usize) -> Self {
        let host = gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "UNKNOWN".to_string());
        Self::CapacityExhausted {
            mode,
            ceiling,
            host,
        }
    }
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;
