//! Filesystem directory
//!
//! Inputs are mmap-backed: opening a file maps it once and every cursor
//! clone shares the mapping. Outputs buffer through `BufWriter` and
//! fsync on close. Renames map to `std::fs::rename`, which atomically
//! replaces the target within one directory.
//!
//! Locking uses exclusive file creation (`create_new`): the lock is held
//! while the lock file exists, and the guard removes the file on drop.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lucerna_core::{Error, Result};
use tracing::trace;

use crate::directory::{Directory, Lock};
use crate::input::IndexInput;
use crate::output::IndexOutput;

/// How often lock acquisition re-checks the lock file.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A directory on the local filesystem.
#[derive(Debug)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Open (creating if needed) a filesystem directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(FsDirectory { root })
    }

    /// Root path of this directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Directory for FsDirectory {
    fn list_all(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Ok(name) = entry.file_name().into_string() {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        Ok(std::fs::metadata(self.path(name))?.len())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        std::fs::remove_file(self.path(name))?;
        Ok(())
    }

    fn create_output(&self, name: &str) -> Result<IndexOutput> {
        let file = File::create(self.path(name))?;
        Ok(IndexOutput::file(file))
    }

    fn open_input(&self, name: &str) -> Result<IndexInput> {
        let file = File::open(self.path(name))?;
        let len = file.metadata()?.len();
        // Mapping a zero-length file is rejected on some platforms
        if len == 0 {
            return Ok(IndexInput::from_vec(Vec::new()));
        }
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(IndexInput::new(Arc::new(mmap)))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        std::fs::rename(self.path(from), self.path(to))?;
        Ok(())
    }

    fn obtain_lock(&self, name: &str, timeout: Duration) -> Result<Lock> {
        let path = self.path(name);
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    let lock_path = path.clone();
                    return Ok(Lock::new(move || {
                        let _ = std::fs::remove_file(&lock_path);
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockObtainFailed {
                            name: name.to_string(),
                            timeout,
                        });
                    }
                    trace!(target: "lucerna::store", lock = name, "lock held, polling");
                    std::thread::sleep(LOCK_POLL_INTERVAL.min(timeout));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn clear_lock(&self, name: &str) -> Result<()> {
        let path = self.path(name);
        if path.is_file() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, FsDirectory) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::open(tmp.path()).unwrap();
        (tmp, dir)
    }

    #[test]
    fn test_write_then_read() {
        let (_tmp, dir) = open_temp();
        let mut out = dir.create_output("data").unwrap();
        out.write_vint(300).unwrap();
        out.write_string("hello").unwrap();
        out.close().unwrap();

        let mut input = dir.open_input("data").unwrap();
        assert_eq!(input.read_vint().unwrap(), 300);
        assert_eq!(input.read_string().unwrap(), "hello");
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_list_and_delete() {
        let (_tmp, dir) = open_temp();
        dir.create_output("a").unwrap().close().unwrap();
        dir.create_output("b").unwrap().close().unwrap();

        let mut names = dir.list_all().unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);

        dir.delete_file("a").unwrap();
        assert!(!dir.exists("a"));
        assert!(dir.exists("b"));
    }

    #[test]
    fn test_rename_replaces_target() {
        let (_tmp, dir) = open_temp();
        let mut out = dir.create_output("new").unwrap();
        out.write_byte(7).unwrap();
        out.close().unwrap();
        dir.create_output("old").unwrap().close().unwrap();

        dir.rename("new", "old").unwrap();
        assert!(!dir.exists("new"));
        let mut input = dir.open_input("old").unwrap();
        assert_eq!(input.read_byte().unwrap(), 7);
    }

    #[test]
    fn test_lock_exclusion_and_release() {
        let (_tmp, dir) = open_temp();
        let lock = dir
            .obtain_lock("write.lock", Duration::from_millis(10))
            .unwrap();

        let err = dir
            .obtain_lock("write.lock", Duration::from_millis(10))
            .unwrap_err();
        assert!(err.is_lock_failure());

        drop(lock);
        dir.obtain_lock("write.lock", Duration::from_millis(10))
            .unwrap();
    }

    #[test]
    fn test_clear_stale_lock() {
        let (_tmp, dir) = open_temp();
        let lock = dir
            .obtain_lock("write.lock", Duration::from_millis(10))
            .unwrap();
        std::mem::forget(lock); // simulate a crashed writer

        dir.clear_lock("write.lock").unwrap();
        dir.obtain_lock("write.lock", Duration::from_millis(10))
            .unwrap();
    }

    #[test]
    fn test_empty_file_input() {
        let (_tmp, dir) = open_temp();
        dir.create_output("empty").unwrap().close().unwrap();
        let input = dir.open_input("empty").unwrap();
        assert!(input.is_empty());
    }
}
