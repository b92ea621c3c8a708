use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

/// Advisory lock on a file, coordinating access to shared on-disk state
/// between processes.
///
/// Locks are acquired through [`LockFile::write`] / [`LockFile::read`] (and
/// their non-blocking `try_` variants), which return a guard; the OS lock is
/// released when the guard drops, on every exit path. Two `LockFile`s opened
/// on the same path from different processes exclude each other; within one
/// process, callers that need serialization must add their own (the store
/// pairs this with a mutex).
pub struct LockFile {
    file: File,
    path: PathBuf,
}

/// Holds the OS lock until dropped.
pub struct LockGuard<'a> {
    file: &'a File,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // Nothing useful to do on failure; the lock dies with the fd anyway.
        let _ = self.file.unlock();
    }
}

impl LockFile {
    /// Open (creating if necessary) the lock file at `path`. Parent
    /// directories are created as needed. No lock is taken yet.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(LockFile {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the exclusive lock, blocking until it is available.
    pub fn write(&self) -> io::Result<LockGuard<'_>> {
        self.file.lock_exclusive()?;
        debug!(path = %self.path.display(), "acquired write lock");
        Ok(LockGuard { file: &self.file })
    }

    /// Acquire the shared lock, blocking until it is available.
    pub fn read(&self) -> io::Result<LockGuard<'_>> {
        self.file.lock_shared()?;
        debug!(path = %self.path.display(), "acquired read lock");
        Ok(LockGuard { file: &self.file })
    }

    /// Try to acquire the exclusive lock without blocking. Returns
    /// `Ok(None)` if another process holds a conflicting lock.
    pub fn try_write(&self) -> io::Result<Option<LockGuard<'_>>> {
        match FileExt::try_lock_exclusive(&self.file) {
            Ok(()) => Ok(Some(LockGuard { file: &self.file })),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Try to acquire the shared lock without blocking. Returns `Ok(None)`
    /// if another process holds the exclusive lock.
    pub fn try_read(&self) -> io::Result<Option<LockGuard<'_>>> {
        match FileExt::try_lock_shared(&self.file) {
            Ok(()) => Ok(Some(LockGuard { file: &self.file })),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}
