use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum FileLockError {
    #[error("lock `{0}` is held by another process")]
    Busy(String),

    #[error("cannot open lock file `{0}`: {1}")]
    Open(String, io::Error),

    #[error("cannot lock `{0}`: {1}")]
    Lock(String, Errno),
}

/// Advisory exclusive lock on a file, acquired with a non-blocking
/// `flock(2)`. The lock is released when the guard is dropped, and by the
/// kernel if the holder dies.
pub struct ExclusiveFileLock {
    _lock: Flock<File>,
}

impl ExclusiveFileLock {
    /// Acquires the lock or fails immediately with [`FileLockError::Busy`]
    /// when another process holds it. The lock file is created if missing and
    /// never deleted.
    pub fn acquire(path: &Path) -> Result<Self, FileLockError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| FileLockError::Open(path.display().to_string(), e))?;
        #[cfg(target_family = "unix")]
        {
            use std::os::unix::fs::PermissionsExt;
            // Ignored on failure: the lock itself does not depend on the mode.
            let _ = file.set_permissions(crate::utils::lock_file_permissions());
        }
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!(path = %path.display(), "acquired file lock");
                Ok(Self { _lock: lock })
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                Err(FileLockError::Busy(path.display().to_string()))
            }
            Err((_, errno)) => Err(FileLockError::Lock(path.display().to_string(), errno)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_creates_the_lock_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("op.lock");

        let _guard = ExclusiveFileLock::acquire(&path).unwrap();

        assert!(path.is_file());
    }

    #[test]
    fn test_reacquire_after_release() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("op.lock");

        let guard = ExclusiveFileLock::acquire(&path).unwrap();
        drop(guard);
        ExclusiveFileLock::acquire(&path).unwrap();
    }

    // A second flock from the same process on an independent file descriptor
    // conflicts the same way a second process would.
    #[test]
    fn test_concurrent_acquire_is_busy() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("op.lock");

        let _guard = ExclusiveFileLock::acquire(&path).unwrap();
        let result = ExclusiveFileLock::acquire(&path);

        assert!(matches!(result, Err(FileLockError::Busy(_))));
    }
}
