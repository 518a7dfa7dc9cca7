//! Per-entry claims over the shared schedule directory.
//!
//! A claim is an exclusive, non-blocking `flock(2)` on the entry file itself.
//! Agents on other hosts racing for the same entry see [`Claim::Busy`] and
//! move on; nobody ever waits for a lock.
//!
//! The entry's modification time is the only completion record. It is read
//! once, right after the lock is taken, and only [`EntryLock::touch`] ever
//! changes it.
//!
//! # Release
//!
//! [`EntryLock`] owns the open file and the lock. Dropping it unlocks and
//! closes the file, so every exit path (including an unwinding panic)
//! releases the claim. [`EntryLock::release`] does the same explicitly and
//! reports an unlock failure. If the process dies, the OS drops the lock.
//!
//! # Synchronous I/O
//!
//! Claims use `std::fs` rather than `tokio::fs`: `flock` needs the owned
//! `std::fs::File`, and the open, the `LOCK_NB` lock and the `fstat` all
//! return immediately, so they are called inline from the agent's async
//! loop instead of being shipped to the blocking pool.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{AgentError, Result};

/// Result of a claim attempt that managed to open the entry.
#[derive(Debug)]
pub enum Claim {
    /// This agent now holds the entry exclusively.
    Claimed(EntryLock),
    /// Another holder has the entry locked.
    Busy,
}

/// Exclusive hold on one schedule entry.
pub struct EntryLock {
    path: PathBuf,
    file: Flock<File>,
    last_modified: SystemTime,
}

impl fmt::Debug for EntryLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryLock")
            .field("path", &self.path)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

/// Try to claim the entry at `path` without blocking.
///
/// The file is opened read/write and never created. Open, lock and
/// metadata failures are returned as errors; lock contention is
/// `Ok(Claim::Busy)`.
pub fn try_claim(path: &Path) -> Result<Claim> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| AgentError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(locked) => locked,
        Err((_, Errno::EWOULDBLOCK)) => return Ok(Claim::Busy),
        Err((_, source)) => {
            return Err(AgentError::Lock {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    // Read before any mutation; this is the staleness input.
    let last_modified = file
        .metadata()
        .and_then(|meta| meta.modified())
        .map_err(|source| AgentError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(Claim::Claimed(EntryLock {
        path: path.to_path_buf(),
        file,
        last_modified,
    }))
}

impl EntryLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Modification time observed when the claim was taken.
    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    /// Mark the entry processed by setting its modification time to now.
    ///
    /// Applied to the locked handle rather than the path, so a file
    /// swapped in under the same name is never marked.
    pub fn touch(&self) -> Result<SystemTime> {
        let now = SystemTime::now();
        self.file
            .set_modified(now)
            .map_err(|source| AgentError::Touch {
                path: self.path.clone(),
                source,
            })?;
        Ok(now)
    }

    /// Whether the path still names the file this lock is held on.
    ///
    /// False once the scheduler removed or replaced the entry while it was
    /// being processed.
    pub fn still_present(&self) -> bool {
        let held = match self.file.metadata() {
            Ok(meta) => meta,
            Err(_) => return false,
        };
        match std::fs::metadata(&self.path) {
            Ok(current) => current.dev() == held.dev() && current.ino() == held.ino(),
            Err(_) => false,
        }
    }

    /// Unlock and close the entry.
    pub fn release(self) -> Result<()> {
        let EntryLock { path, file, .. } = self;
        match file.unlock() {
            Ok(file) => {
                drop(file);
                Ok(())
            }
            Err((_still_locked, source)) => Err(AgentError::Release { path, source }),
        }
    }
}
