//! Whole-repository lock held across a mutating command.
//!
//! Multi-step mutations (write object, advance branch, clear index) are only
//! atomic with respect to other processes while this lock is held. The lock
//! is an OS-level exclusive lock on `.rev/lock`, acquired without blocking
//! and released when the guard drops, on every exit path.

use std::{
    fs::{File, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use fs2::FileExt;

use crate::error::{Error, Result};

pub const LOCK_FILE: &str = "lock";

#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    file: Option<File>,
}

impl RepoLock {
    /// Takes the lock in `meta_dir`, failing fast with [`Error::Locked`] if
    /// another handle already holds it.
    pub fn acquire(meta_dir: &Path) -> Result<Self> {
        let path = meta_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                log::debug!("acquired {:?}", path);
                Ok(Self {
                    path,
                    file: Some(file),
                })
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Err(Error::Locked),
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(Error::Locked)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            // Closing the descriptor releases the lock even if unlock fails.
            let _ = file.unlock();
            log::debug!("released {:?}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_fast() {
        let temp = tempfile::tempdir().unwrap();
        let lock = RepoLock::acquire(temp.path()).unwrap();
        assert!(lock.path().exists());
        assert!(matches!(RepoLock::acquire(temp.path()), Err(Error::Locked)));
    }

    #[test]
    fn drop_releases() {
        let temp = tempfile::tempdir().unwrap();
        drop(RepoLock::acquire(temp.path()).unwrap());
        assert!(RepoLock::acquire(temp.path()).is_ok());
    }
}
