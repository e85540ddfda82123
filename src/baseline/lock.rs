use crate::error::{Result, SyncError};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Held exclusive lock serializing every baseline mutation.
///
/// Dropping it unlocks and removes the lock file, so an early return or panic
/// mid-update cannot leak it.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    file: Option<File>,
}

impl RepoLock {
    /// Block until the lock at `path` is held, polling every `poll`.
    pub fn acquire(path: &Path, timeout: Duration, poll: Duration) -> Result<Self> {
        let started = Instant::now();

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .map_err(|e| SyncError::storage("open lock file", path, e))?;

            match try_lock(&file) {
                Ok(true) => {
                    // A previous holder may have unlinked the path between our
                    // open and lock; only the inode still at `path` counts.
                    if same_file(&file, path) {
                        tracing::trace!("Acquired baseline lock {}", path.display());
                        return Ok(Self {
                            path: path.to_path_buf(),
                            file: Some(file),
                        });
                    }
                    unlock(&file);
                }
                Ok(false) => {}
                Err(e) => return Err(SyncError::storage("lock", path, e)),
            }

            drop(file);
            if started.elapsed() >= timeout {
                return Err(SyncError::LockTimeout {
                    path: path.to_path_buf(),
                    waited: started.elapsed(),
                });
            }
            std::thread::sleep(poll);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            // Unlink while still holding the lock so waiters re-open a fresh inode.
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove lock file {}: {}", self.path.display(), e);
                }
            }
            unlock(&file);
        }
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(false),
        _ => Err(err),
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> std::io::Result<bool> {
    use std::sync::Once;

    static WARN: Once = Once::new();
    WARN.call_once(|| {
        tracing::warn!("Advisory locks are not supported on this platform; baseline updates run unlocked");
    });
    Ok(true)
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_file_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("repo.lock");

        {
            let lock = RepoLock::acquire(&path, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL).unwrap();
            assert!(lock.path().exists());
        }

        assert!(!path.exists());
    }

    #[test]
    fn test_reacquire_after_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("repo.lock");

        let first = RepoLock::acquire(&path, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL).unwrap();
        drop(first);
        let second = RepoLock::acquire(&path, Duration::from_millis(200), Duration::from_millis(10));
        assert!(second.is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn test_contended_lock_times_out() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("repo.lock");

        let _held = RepoLock::acquire(&path, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL).unwrap();
        let err = RepoLock::acquire(&path, Duration::from_millis(250), Duration::from_millis(50))
            .unwrap_err();

        assert!(matches!(err, SyncError::LockTimeout { .. }));
        assert!(err.is_retryable());
        // The holder's file must survive a failed contender.
        assert!(path.exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_waiter_proceeds_when_holder_releases() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("repo.lock");

        let held = RepoLock::acquire(&path, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL).unwrap();
        let waiter_path = path.clone();
        let waiter = std::thread::spawn(move || {
            RepoLock::acquire(&waiter_path, Duration::from_secs(5), Duration::from_millis(10)).map(|_| ())
        });

        std::thread::sleep(Duration::from_millis(100));
        drop(held);

        assert!(waiter.join().unwrap().is_ok());
    }
}
