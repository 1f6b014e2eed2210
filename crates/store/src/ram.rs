//! In-memory directory
//!
//! Backs the same trait as the filesystem directory with a shared map of
//! name → bytes. Used for tests, ephemeral indexes, and as the staging
//! area for the writer's buffered segment. Files become visible only
//! when their output closes, mirroring the visibility the filesystem
//! directory gets from buffered writes plus rename.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lucerna_core::{Error, Result};
use parking_lot::{Mutex, RwLock};

use crate::directory::{Directory, Lock};
use crate::input::IndexInput;
use crate::output::{FileMap, IndexOutput};

/// A directory held entirely in memory.
#[derive(Debug, Default)]
pub struct RamDirectory {
    files: FileMap,
    locks: Arc<Mutex<HashSet<String>>>,
}

impl RamDirectory {
    /// Create an empty RAM directory.
    pub fn new() -> Self {
        RamDirectory {
            files: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Total bytes across all files. Drives the writer's flush decision.
    pub fn size_in_bytes(&self) -> u64 {
        self.files.read().values().map(|b| b.len() as u64).sum()
    }
}

impl Directory for RamDirectory {
    fn list_all(&self) -> Result<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        self.files
            .read()
            .get(name)
            .map(|b| b.len() as u64)
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such file: {}", name),
                ))
            })
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.write().remove(name).map(|_| ()).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {}", name),
            ))
        })
    }

    fn create_output(&self, name: &str) -> Result<IndexOutput> {
        Ok(IndexOutput::ram(name.to_string(), Arc::clone(&self.files)))
    }

    fn open_input(&self, name: &str) -> Result<IndexInput> {
        let bytes = self.files.read().get(name).cloned().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {}", name),
            ))
        })?;
        Ok(IndexInput::new(bytes))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut files = self.files.write();
        let bytes = files.remove(from).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {}", from),
            ))
        })?;
        files.insert(to.to_string(), bytes);
        Ok(())
    }

    fn obtain_lock(&self, name: &str, timeout: Duration) -> Result<Lock> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.locks.lock().insert(name.to_string()) {
                let locks = Arc::clone(&self.locks);
                let name = name.to_string();
                return Ok(Lock::new(move || {
                    locks.lock().remove(&name);
                }));
            }
            if Instant::now() >= deadline {
                return Err(Error::LockObtainFailed {
                    name: name.to_string(),
                    timeout,
                });
            }
            std::thread::yield_now();
        }
    }

    fn clear_lock(&self, name: &str) -> Result<()> {
        self.locks.lock().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_visible_only_after_close() {
        let dir = RamDirectory::new();
        let mut out = dir.create_output("seg").unwrap();
        out.write_byte(1).unwrap();
        assert!(!dir.exists("seg"));

        out.close().unwrap();
        assert!(dir.exists("seg"));
        assert_eq!(dir.file_length("seg").unwrap(), 1);
    }

    #[test]
    fn test_inputs_survive_delete() {
        let dir = RamDirectory::new();
        let mut out = dir.create_output("seg").unwrap();
        out.write_byte(9).unwrap();
        out.close().unwrap();

        let mut input = dir.open_input("seg").unwrap();
        dir.delete_file("seg").unwrap();
        // The cursor holds the bytes alive
        assert_eq!(input.read_byte().unwrap(), 9);
    }

    #[test]
    fn test_rename_and_missing_file_errors() {
        let dir = RamDirectory::new();
        dir.create_output("a").unwrap().close().unwrap();
        dir.rename("a", "b").unwrap();
        assert!(dir.exists("b"));
        assert!(dir.open_input("a").is_err());
        assert!(dir.rename("missing", "x").is_err());
    }

    #[test]
    fn test_lock_roundtrip() {
        let dir = RamDirectory::new();
        let lock = dir
            .obtain_lock("write.lock", Duration::from_millis(5))
            .unwrap();
        assert!(dir
            .obtain_lock("write.lock", Duration::from_millis(5))
            .is_err());
        drop(lock);
        assert!(dir
            .obtain_lock("write.lock", Duration::from_millis(5))
            .is_ok());
    }
}
