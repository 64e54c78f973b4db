//! Advisory vault lock
//!
//! The lock lives on a sidecar `<vault>.lock` file rather than the vault
//! itself: writes replace the vault file by rename, which would silently drop
//! a lock held on the old inode.

use crate::error::{Result, VaultError};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive, non-blocking `flock` held for the lifetime of the value
#[derive(Debug)]
pub struct VaultLock {
    file: File,
    path: PathBuf,
}

/// Lock file path for a vault file
pub fn lock_path(vault_path: &Path) -> PathBuf {
    let mut name = vault_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    vault_path.with_file_name(name)
}

impl VaultLock {
    /// Acquire the lock for `vault_path`, failing with `VaultLocked` if any
    /// other holder (process or open handle) has it.
    pub fn acquire(vault_path: &Path) -> Result<Self> {
        let path = lock_path(vault_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&path)?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Err(VaultError::VaultLocked(vault_path.to_path_buf()));
            }
            return Err(err.into());
        }

        debug!(path = %path.display(), "acquired vault lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for VaultLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        debug!(path = %self.path.display(), "released vault lock");
    }
}
