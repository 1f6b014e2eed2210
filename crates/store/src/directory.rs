//! Directory abstraction
//!
//! A directory is a flat namespace of immutable-once-written byte files
//! plus an atomic rename and an advisory lock. The index engine is
//! written entirely against this trait; everything it persists goes
//! through `create_output` and comes back through `open_input`.

use std::time::Duration;

use lucerna_core::Result;

use crate::input::IndexInput;
use crate::output::IndexOutput;

/// Named byte streams with atomic rename and advisory locking.
pub trait Directory: Send + Sync + std::fmt::Debug {
    /// Names of all files in the directory.
    fn list_all(&self) -> Result<Vec<String>>;

    /// Whether a file exists.
    fn exists(&self, name: &str) -> bool;

    /// Length of a file in bytes.
    fn file_length(&self, name: &str) -> Result<u64>;

    /// Remove a file.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// Create a file, replacing any previous file of the same name.
    fn create_output(&self, name: &str) -> Result<IndexOutput>;

    /// Open a file for random-access reads. The returned input clones
    /// cheaply into independent cursors.
    fn open_input(&self, name: &str) -> Result<IndexInput>;

    /// Atomically rename `from` to `to`, replacing `to` if present.
    /// This is the commit point of the engine's write protocol.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Acquire the named advisory lock, polling until `timeout` expires.
    /// Fails with `LockObtainFailed` on expiry. The lock is released
    /// when the returned guard drops.
    fn obtain_lock(&self, name: &str, timeout: Duration) -> Result<Lock>;

    /// Forcibly remove a lock left behind by a crashed process. Callers
    /// must know no live writer holds it.
    fn clear_lock(&self, name: &str) -> Result<()>;
}

/// Guard for an acquired directory lock; released on drop.
pub struct Lock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Lock {
    pub(crate) fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Lock {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock").finish()
    }
}
