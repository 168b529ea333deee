//! Cross-process renewal lock.
//!
//! The lock is a marker file whose presence means "certificate material
//! is being mutated". It carries the owner PID and acquisition time so a
//! marker left behind by a crashed run does not block the watcher forever.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const EMPTY_MARKER_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("renewal lock {path:?} is held by pid {pid}")]
    Held { path: PathBuf, pid: u32 },

    #[error("renewal lock {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Marker file content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    /// Seconds since the Unix epoch.
    pub acquired_at: u64,
}

/// Observed lock state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Free,
    Held { pid: u32 },
    Stale { reason: String },
}

/// Handle to the renewal lock marker.
#[derive(Debug, Clone)]
pub struct RenewalLock {
    path: PathBuf,
    stale_after: Duration,
}

impl RenewalLock {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inspect the marker without modifying it.
    pub fn state(&self) -> LockState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return LockState::Free,
            Err(e) => {
                return LockState::Stale {
                    reason: format!("unreadable marker: {}", e),
                }
            }
        };

        let owner: LockOwner = match serde_json::from_str(&content) {
            Ok(owner) => owner,
            Err(_) if content.is_empty() => return self.empty_marker_state(),
            Err(e) => {
                return LockState::Stale {
                    reason: format!("corrupt marker: {}", e),
                }
            }
        };

        let age = now_secs().saturating_sub(owner.acquired_at);
        if age > self.stale_after.as_secs() {
            return LockState::Stale {
                reason: format!("held by pid {} for {}s", owner.pid, age),
            };
        }
        if !process_alive(owner.pid) {
            return LockState::Stale {
                reason: format!("owner pid {} is not running", owner.pid),
            };
        }

        LockState::Held { pid: owner.pid }
    }

    /// An empty marker is held only briefly: an acquirer between create and
    /// write. Past the grace window it was left by a crash or a foreign `touch`.
    fn empty_marker_state(&self) -> LockState {
        let age = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map(|modified| SystemTime::now().duration_since(modified).unwrap_or_default());

        match age {
            Ok(age) if age <= EMPTY_MARKER_GRACE.min(self.stale_after) => LockState::Held { pid: 0 },
            Ok(age) => LockState::Stale {
                reason: format!("empty marker, {}s old", age.as_secs()),
            },
            Err(e) => LockState::Stale {
                reason: format!("empty marker: {}", e),
            },
        }
    }

    /// Whether a live owner currently holds the lock.
    pub fn is_held(&self) -> bool {
        matches!(self.state(), LockState::Held { .. })
    }

    /// Acquire the lock, reclaiming a stale marker. Released when the guard drops.
    pub fn acquire(&self) -> Result<RenewalLockGuard, LockError> {
        match self.state() {
            LockState::Held { pid } => {
                return Err(LockError::Held {
                    path: self.path.clone(),
                    pid,
                })
            }
            LockState::Stale { reason } => {
                tracing::warn!(path = ?self.path, reason = %reason, "Reclaiming stale renewal lock");
                std::fs::remove_file(&self.path).map_err(|source| self.io_err(source))?;
            }
            LockState::Free => {}
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| self.io_err(source))?;
            }
        }

        let owner = LockOwner {
            pid: std::process::id(),
            acquired_at: now_secs(),
        };

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Lost a race against another acquirer.
                return Err(LockError::Held {
                    path: self.path.clone(),
                    pid: 0,
                });
            }
            Err(source) => return Err(self.io_err(source)),
        };

        let body = serde_json::to_vec(&owner).map_err(|e| self.io_err(e.into()))?;
        file.write_all(&body).map_err(|source| self.io_err(source))?;

        tracing::info!(path = ?self.path, pid = owner.pid, "Renewal lock acquired");
        Ok(RenewalLockGuard {
            path: self.path.clone(),
        })
    }

    fn io_err(&self, source: io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Scoped ownership of the renewal lock; the marker is removed on drop.
#[derive(Debug)]
pub struct RenewalLockGuard {
    path: PathBuf,
}

impl Drop for RenewalLockGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = ?self.path, "Renewal lock released"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!(path = ?self.path, error = %e, "Failed to release renewal lock"),
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}
