//! Mutual-exclusion run lock
//!
//! A single marker file holds the owning process id. A marker naming a live
//! process means another run is in progress and this one must abort; a marker
//! naming a dead process is stale (the owner crashed) and is reclaimed. The
//! lock is released on every exit path through `Drop`.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another run is already in progress (pid {pid})")]
    AlreadyRunning { pid: u32 },
    #[error("failed to access lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive run lock held for the lifetime of a backup run
pub struct RunLock {
    path: PathBuf,
    pid: u32,
}

impl RunLock {
    /// Acquire the lock, reclaiming a stale marker left by a dead process.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if path.exists() {
            match read_owner_pid(path) {
                Some(pid) if process_alive(pid) => {
                    return Err(LockError::AlreadyRunning { pid });
                }
                Some(pid) => {
                    warn!("Removing stale lock from dead process {}", pid);
                    remove_marker(path)?;
                }
                None => {
                    warn!("Removing unreadable lock file: {}", path.display());
                    remove_marker(path)?;
                }
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let pid = std::process::id();
        fs::write(path, pid.to_string()).map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Run lock acquired: {} (pid {})", path.display(), pid);
        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Only remove a marker we still own; a reclaimed-then-reacquired
        // lock belongs to someone else.
        if read_owner_pid(&self.path) == Some(self.pid) {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to remove lock file {}: {}", self.path.display(), e);
            } else {
                debug!("Run lock released: {}", self.path.display());
            }
        }
    }
}

fn read_owner_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}

fn remove_marker(path: &Path) -> Result<(), LockError> {
    fs::remove_file(path).map_err(|source| LockError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Check whether a process with this id exists
fn process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal;
        use nix::unistd::Pid;

        match signal::kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => true,
            Err(Errno::ESRCH) => false,
            // Permission denied still means the process exists
            Err(_) => true,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join("run.lock");

        {
            let lock = RunLock::acquire(&lock_path).expect("Failed to acquire lock");
            assert!(lock_path.exists());
            assert_eq!(
                read_owner_pid(lock.path()),
                Some(std::process::id())
            );
        }

        // Dropped: marker is gone and the lock is free again
        assert!(!lock_path.exists());
        let _relock = RunLock::acquire(&lock_path).expect("Failed to reacquire lock");
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join("run.lock");

        let _held = RunLock::acquire(&lock_path).expect("Failed to acquire lock");

        // Our own pid is alive, so a second acquire must conflict
        match RunLock::acquire(&lock_path) {
            Err(LockError::AlreadyRunning { pid }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected AlreadyRunning, got {:?}", other.map(|l| l.pid)),
        }
    }

    #[test]
    fn test_stale_lock_from_dead_process_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join("run.lock");

        // A short-lived child gives us a pid that is certainly dead
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("Failed to spawn child");
        let dead_pid = child.id();
        child.wait().expect("Failed to wait for child");

        std::fs::write(&lock_path, dead_pid.to_string()).unwrap();

        let lock = RunLock::acquire(&lock_path).expect("stale lock should be reclaimed");
        assert_eq!(read_owner_pid(lock.path()), Some(std::process::id()));
    }

    #[test]
    fn test_garbage_lock_file_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join("run.lock");

        std::fs::write(&lock_path, "not-a-pid").unwrap();

        let _lock = RunLock::acquire(&lock_path).expect("garbage lock should be reclaimed");
    }
}
