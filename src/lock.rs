// src/lock.rs

//! Reentrant shared/exclusive resource lock
//!
//! Guards a repository against concurrent writers. Readers (dependency
//! resolution) take the lock in shared mode, writers (package merges and
//! removals) in exclusive mode.
//!
//! # Lock Strategy
//!
//! - **File mode**: `flock(2)` on a lock file next to the repository, so
//!   separate processes exclude each other.
//! - **Direct mode**: bookkeeping only, for in-memory and test repositories.
//!
//! Within one process the lock is reentrant: nested shared acquisitions and
//! shared acquisitions under an exclusive hold only bump counters. Taking
//! the exclusive lock while only holding it shared promotes the underlying
//! `flock` in place; releasing the last exclusive hold while shared holds
//! remain demotes it back.
//!
//! Blocking `flock` calls run without the bookkeeping mutex held, so other
//! threads can still query or release their holds while one thread waits on
//! another process. A pending acquisition is counted as held while it waits.
//!
//! # Example
//!
//! ```ignore
//! use entropy::lock::ResourceLock;
//!
//! let lock = ResourceLock::file("/var/lib/entropy/client/database/installed.db.lock")?;
//! let mut guard = lock.shared()?;
//! // ... read-only work ...
//! guard.promote()?;
//! // ... write ...
//! ```

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Mode a guard holds the lock in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
enum Backend {
    File { path: PathBuf, file: File },
    Direct,
}

#[derive(Debug, Default)]
struct Holds {
    shared: usize,
    exclusive: usize,
}

impl Holds {
    fn add(&mut self, mode: LockMode) {
        match mode {
            LockMode::Shared => self.shared += 1,
            LockMode::Exclusive => self.exclusive += 1,
        }
    }

    fn remove(&mut self, mode: LockMode) {
        match mode {
            LockMode::Shared => self.shared = self.shared.saturating_sub(1),
            LockMode::Exclusive => self.exclusive = self.exclusive.saturating_sub(1),
        }
    }

    fn mode(&self) -> Option<LockMode> {
        if self.exclusive > 0 {
            Some(LockMode::Exclusive)
        } else if self.shared > 0 {
            Some(LockMode::Shared)
        } else {
            None
        }
    }
}

/// Reentrant shared/exclusive lock
#[derive(Debug)]
pub struct ResourceLock {
    backend: Backend,
    holds: Mutex<Holds>,
    /// Serializes threads that may block in `flock`
    gate: Mutex<()>,
}

impl ResourceLock {
    /// Lock backed by `flock` on `path`, created if missing
    pub fn file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        Ok(Self {
            backend: Backend::File { path, file },
            holds: Mutex::new(Holds::default()),
            gate: Mutex::new(()),
        })
    }

    /// Process-local lock without any file
    pub fn direct() -> Self {
        Self {
            backend: Backend::Direct,
            holds: Mutex::new(Holds::default()),
            gate: Mutex::new(()),
        }
    }

    /// Path of the lock file, if file backed
    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::File { path, .. } => Some(path),
            Backend::Direct => None,
        }
    }

    /// Mode currently held or being acquired by this process, if any
    pub fn held_mode(&self) -> Result<Option<LockMode>> {
        Ok(self.holds()?.mode())
    }

    /// Acquire in shared mode, blocking until available
    pub fn shared(&self) -> Result<LockGuard<'_>> {
        self.acquire(LockMode::Shared, true)?;
        Ok(LockGuard::new(self, LockMode::Shared))
    }

    /// Acquire in exclusive mode, blocking until available
    pub fn exclusive(&self) -> Result<LockGuard<'_>> {
        self.acquire(LockMode::Exclusive, true)?;
        Ok(LockGuard::new(self, LockMode::Exclusive))
    }

    /// Try to acquire in shared mode; `None` if another process holds it exclusively
    pub fn try_shared(&self) -> Result<Option<LockGuard<'_>>> {
        Ok(self
            .acquire(LockMode::Shared, false)?
            .then(|| LockGuard::new(self, LockMode::Shared)))
    }

    /// Try to acquire in exclusive mode; `None` if another process holds it
    pub fn try_exclusive(&self) -> Result<Option<LockGuard<'_>>> {
        Ok(self
            .acquire(LockMode::Exclusive, false)?
            .then(|| LockGuard::new(self, LockMode::Exclusive)))
    }

    fn holds(&self) -> Result<MutexGuard<'_, Holds>> {
        self.holds
            .lock()
            .map_err(|_| Error::LockError("lock bookkeeping poisoned".to_string()))
    }

    fn gate(&self) -> Result<MutexGuard<'_, ()>> {
        self.gate
            .lock()
            .map_err(|_| Error::LockError("lock gate poisoned".to_string()))
    }

    /// Returns false only when `blocking` is off and the lock is contended
    fn acquire(&self, mode: LockMode, blocking: bool) -> Result<bool> {
        let _gate = self.gate()?;

        // Counted before the flock call; a concurrent release must not drop it
        let needed = {
            let mut holds = self.holds()?;
            let needed = match (holds.mode(), mode) {
                (Some(LockMode::Exclusive), _) | (Some(LockMode::Shared), LockMode::Shared) => None,
                (_, wanted) => Some(wanted),
            };
            holds.add(mode);
            needed
        };

        let Some(wanted) = needed else {
            return Ok(true);
        };
        match self.flock(wanted, blocking) {
            Ok(true) => Ok(true),
            outcome => {
                let mut holds = self.holds()?;
                holds.remove(mode);
                self.restore(holds.mode())?;
                outcome
            }
        }
    }

    fn release(&self, mode: LockMode) -> Result<()> {
        let mut holds = self.holds()?;
        holds.remove(mode);

        match (mode, holds.mode()) {
            (_, None) => self.unlock(),
            (LockMode::Exclusive, Some(LockMode::Shared)) => self.restore(Some(LockMode::Shared)),
            _ => Ok(()),
        }
    }

    /// Bring the flock in line with the bookkept mode
    fn restore(&self, mode: Option<LockMode>) -> Result<()> {
        match mode {
            None => self.unlock(),
            Some(mode) => self.flock(mode, true).map(|_| ()),
        }
    }

    /// Move one hold from shared to exclusive
    fn promote(&self) -> Result<()> {
        let _gate = self.gate()?;

        let needed = {
            let mut holds = self.holds()?;
            if holds.shared == 0 {
                return Err(Error::LockError("promote without a shared hold".to_string()));
            }
            let needed = holds.exclusive == 0;
            holds.shared -= 1;
            holds.exclusive += 1;
            needed
        };

        if needed && let Err(e) = self.flock(LockMode::Exclusive, true) {
            let mut holds = self.holds()?;
            holds.exclusive -= 1;
            holds.shared += 1;
            self.restore(holds.mode())?;
            return Err(e);
        }
        Ok(())
    }

    /// Move one hold from exclusive to shared
    fn demote(&self) -> Result<()> {
        let mut holds = self.holds()?;
        if holds.exclusive == 0 {
            return Err(Error::LockError("demote without an exclusive hold".to_string()));
        }

        holds.exclusive -= 1;
        holds.shared += 1;
        if holds.exclusive == 0 {
            self.flock(LockMode::Shared, true)?;
        }
        Ok(())
    }

    fn flock(&self, mode: LockMode, blocking: bool) -> Result<bool> {
        let Backend::File { path, file } = &self.backend else {
            return Ok(true);
        };

        // fs2 calls, not std's inherent `File` locks
        let result = match (mode, blocking) {
            (LockMode::Shared, true) => FileExt::lock_shared(file),
            (LockMode::Exclusive, true) => FileExt::lock_exclusive(file),
            (LockMode::Shared, false) => FileExt::try_lock_shared(file),
            (LockMode::Exclusive, false) => FileExt::try_lock_exclusive(file),
        };

        match result {
            Ok(()) => {
                debug!("Locked {:?} in {:?} mode", path, mode);
                Ok(true)
            }
            Err(e) if !blocking && e.kind() == ErrorKind::WouldBlock => {
                debug!("Lock {:?} is held by another process", path);
                Ok(false)
            }
            Err(e) => Err(Error::LockError(format!(
                "Failed to lock {} in {:?} mode: {}",
                path.display(),
                mode,
                e
            ))),
        }
    }

    fn unlock(&self) -> Result<()> {
        if let Backend::File { path, file } = &self.backend {
            FileExt::unlock(file).map_err(|e| {
                Error::LockError(format!("Failed to unlock {}: {}", path.display(), e))
            })?;
            debug!("Unlocked {:?}", path);
        }
        Ok(())
    }
}

/// RAII hold on a [`ResourceLock`], released on drop
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a ResourceLock,
    mode: LockMode,
}

impl<'a> LockGuard<'a> {
    fn new(lock: &'a ResourceLock, mode: LockMode) -> Self {
        Self { lock, mode }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Upgrade this hold to exclusive; no-op if already exclusive
    pub fn promote(&mut self) -> Result<()> {
        if self.mode == LockMode::Shared {
            self.lock.promote()?;
            self.mode = LockMode::Exclusive;
        }
        Ok(())
    }

    /// Downgrade this hold to shared; no-op if already shared
    pub fn demote(&mut self) -> Result<()> {
        if self.mode == LockMode::Exclusive {
            self.lock.demote()?;
            self.mode = LockMode::Shared;
        }
        Ok(())
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(self.mode) {
            warn!("Failed to release {:?} lock: {}", self.mode, e);
        }
    }
}
