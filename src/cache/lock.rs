//! Advisory file locking
//!
//! Request workers may be separate OS processes with no shared memory, so
//! all cross-worker coordination goes through `flock(2)` on the shared
//! cache filesystem:
//! - readers hold a shared lock on a cache entry while streaming it, which
//!   keeps the eviction sweep from unlinking it mid-use
//! - populators hold an exclusive lock on a sidecar `.lock` file for the
//!   duration of fetch-and-promote, so at most one fetch per key runs at a
//!   time
//!
//! Locks are released when the underlying descriptor closes, i.e. when the
//! `FileLock` is dropped.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// An acquired advisory lock, released on drop
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

impl FileLock {
    /// Acquire an exclusive lock, creating the file if needed. Blocks
    /// until the lock is available.
    pub fn exclusive(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        flock(&file, libc::LOCK_EX)?;
        Ok(Self { file })
    }

    /// Acquire a shared lock on an existing file. Blocks until no
    /// exclusive holder remains; fails with `NotFound` if the file does
    /// not exist.
    pub fn shared(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        flock(&file, libc::LOCK_SH)?;
        Ok(Self { file })
    }

    /// Try to acquire an exclusive lock on an existing file without
    /// blocking. Returns `None` when another holder is present or the
    /// file does not exist.
    pub fn try_exclusive(path: &Path) -> io::Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        match flock(&file, libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => Ok(Some(Self { file })),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Like `try_exclusive`, but creates the lock file when missing.
    /// Used for sidecar locks, which may legitimately not exist yet.
    pub fn try_exclusive_create(path: &Path) -> io::Result<Option<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        match flock(&file, libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => Ok(Some(Self { file })),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Refresh the locked file's mtime, which is its last-access record
    pub fn touch(&self) -> io::Result<()> {
        self.file.set_modified(std::time::SystemTime::now())
    }
}

/// Acquire an exclusive lock off the async runtime's worker threads
pub async fn exclusive(path: PathBuf) -> io::Result<FileLock> {
    tokio::task::spawn_blocking(move || FileLock::exclusive(&path))
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
}

/// Acquire a shared lock off the async runtime's worker threads
pub async fn shared(path: PathBuf) -> io::Result<FileLock> {
    tokio::task::spawn_blocking(move || FileLock::shared(&path))
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_creates_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.lock");
        let _lock = FileLock::exclusive(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_shared_on_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileLock::shared(&dir.path().join("gone")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_try_exclusive_fails_while_shared_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        std::fs::write(&path, b"data").unwrap();

        let _shared = FileLock::shared(&path).unwrap();
        assert!(FileLock::try_exclusive(&path).unwrap().is_none());
    }

    #[test]
    fn test_try_exclusive_succeeds_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        std::fs::write(&path, b"data").unwrap();

        {
            let _shared = FileLock::shared(&path).unwrap();
        }
        assert!(FileLock::try_exclusive(&path).unwrap().is_some());
    }

    #[test]
    fn test_try_exclusive_on_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileLock::try_exclusive(&dir.path().join("gone"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_multiple_shared_locks_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        std::fs::write(&path, b"data").unwrap();

        let _a = FileLock::shared(&path).unwrap();
        let _b = FileLock::shared(&path).unwrap();
    }

    #[test]
    fn test_touch_updates_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        std::fs::write(&path, b"data").unwrap();

        let old = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(old).unwrap();
        drop(file);

        let lock = FileLock::shared(&path).unwrap();
        lock.touch().unwrap();
        let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert!(mtime > old);
    }
}
