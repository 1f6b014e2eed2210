//! Storage layer for Lucerna
//!
//! This crate implements the directory abstraction the index engine is
//! written against:
//! - **Directory**: named byte streams with atomic rename and advisory locks
//! - **IndexInput**: random-access read cursor with cheap cloning
//! - **IndexOutput**: buffered write stream with positional patching
//! - **Codec**: VInt / VLong / modified-UTF-8 strings / big-endian scalars,
//!   as extension methods on the streams
//!
//! Two implementations are provided: `FsDirectory` (mmap-backed inputs,
//! fsync + rename durability) and `RamDirectory` (ephemeral, for tests
//! and short-lived indexes).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod directory;
pub mod fs;
pub mod input;
pub mod output;
pub mod ram;

pub use directory::{Directory, Lock};
pub use fs::FsDirectory;
pub use input::IndexInput;
pub use output::IndexOutput;
pub use ram::RamDirectory;
