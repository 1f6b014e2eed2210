//! Error types for the Lucerna search engine
//!
//! This module defines the unified error type used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! ## Error Categories
//!
//! - **CorruptIndex**: a structural invariant was violated while reading
//!   (bad magic, over-long VInt, out-of-order term dictionary, checksum
//!   mismatch). Fatal for the operation.
//! - **LockObtainFailed**: the write lock could not be acquired in time.
//! - **StaleReader**: a reader whose underlying segment files are gone.
//! - **InvalidArgument**: out-of-range id, unknown field, malformed input.
//! - **Io**: directory read/write failure, propagated.
//! - **QueryParser**: a query input string did not parse.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the Lucerna search engine
#[derive(Debug, Error)]
pub enum Error {
    /// Structural invariant violated while reading index files
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// Could not acquire the write lock within the timeout
    #[error("could not obtain lock {name:?} within {timeout:?}")]
    LockObtainFailed {
        /// Name of the lock file
        name: String,
        /// How long acquisition was attempted
        timeout: Duration,
    },

    /// Operation on a reader whose segment files have been deleted
    #[error("stale reader: underlying segments no longer exist")]
    StaleReader,

    /// Out-of-range id, unknown field, or malformed input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Query input string did not parse
    #[error("query parse error: {0}")]
    QueryParser(String),
}

impl Error {
    /// Shorthand for a `CorruptIndex` error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptIndex(msg.into())
    }

    /// Check if this error indicates index corruption.
    ///
    /// A corrupt reader/writer is poisoned; callers must not retry on it.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::CorruptIndex(_))
    }

    /// Check if this error is a lock acquisition failure.
    ///
    /// Used for retry logic - only lock failures are safely retryable.
    pub fn is_lock_failure(&self) -> bool {
        matches!(self, Error::LockObtainFailed { .. })
    }
}
