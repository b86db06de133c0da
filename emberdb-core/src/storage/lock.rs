//! Advisory cross-process lock on a collection file
//!
//! The lock lives on a sidecar `{file}.lock` so the collection file itself can be replaced by
//! rename while the lock is held.

use crate::error::{Result, StoreError};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Suffix of the sidecar lock file
pub const LOCK_SUFFIX: &str = ".lock";

/// Held advisory lock; released on drop
#[derive(Debug)]
pub struct FileLock {
    file: File,
    pub exclusive: bool,
}

impl FileLock {
    /// Path of the sidecar lock for `target`
    pub fn lock_path(target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(LOCK_SUFFIX);
        target.with_file_name(name)
    }

    /// Shared lock, for readers
    pub fn shared(target: &Path) -> Result<Self> {
        Self::acquire(target, false)
    }

    /// Exclusive lock, for read-modify-write cycles
    pub fn exclusive(target: &Path) -> Result<Self> {
        Self::acquire(target, true)
    }

    /// Block until the lock is granted
    pub fn acquire(target: &Path, exclusive: bool) -> Result<Self> {
        let lock_path = Self::lock_path(target);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| StoreError::storage(&lock_path, e))?;

        #[cfg(unix)]
        {
            use libc::{flock, LOCK_EX, LOCK_SH};
            use std::os::unix::io::AsRawFd;

            let fd = file.as_raw_fd();
            let operation = if exclusive { LOCK_EX } else { LOCK_SH };

            loop {
                // SAFETY: fd is a valid descriptor owned by `file` for the duration of the call
                let rc = unsafe { flock(fd, operation) };
                if rc == 0 {
                    break;
                }
                let err = std::io::Error::last_os_error();
                if err.kind() != std::io::ErrorKind::Interrupted {
                    return Err(StoreError::storage(&lock_path, err));
                }
            }
        }

        Ok(FileLock { file, exclusive })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use libc::{flock, LOCK_UN};
            use std::os::unix::io::AsRawFd;

            let fd = self.file.as_raw_fd();
            // SAFETY: fd stays valid until `self.file` is dropped after this call
            unsafe {
                flock(fd, LOCK_UN);
            }
        }
    }
}
