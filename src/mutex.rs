//! Single-token mutexes layered on the semaphores.
//!
//! [`Mutex`] caps a [`Semaphore`] at one token, [`FifoMutex`] does the same
//! over a [`FifoSemaphore`]. Unlike a capacity clamp, the release path
//! detects misuse: releasing a mutex nobody holds, or releasing any count
//! other than one, is a programmer error and fails loudly.
//!
//! These mutexes guard no data; they are bare locks used as building blocks
//! (the reader-writer lock uses [`FifoMutex`] turnstiles and a [`Mutex`]
//! write lock). Recursive acquisition deadlocks and is not detected.

use std::time::Duration;

use thiserror::Error;

use crate::cancel::Cancelled;
use crate::semaphore::{FifoSemaphore, Semaphore};

/// Errors produced by releasing a mutex incorrectly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReleaseError {
    /// `release_many` was called with a count other than one.
    #[error("released {0} tokens on a mutex (exactly 1 required)")]
    InvalidCount(usize),
    /// The mutex was already at full capacity: a release without a matching
    /// acquire.
    #[error("mutex released while not held")]
    NotHeld,
}

/// A single-token mutex with no fairness guarantee.
pub struct Mutex {
    sem: Semaphore,
}

impl Mutex {
    /// Creates an unheld mutex (one token).
    pub fn new() -> Self {
        Self {
            sem: Semaphore::new(1),
        }
    }

    /// Creates a mutex that is already held (zero tokens); some thread must
    /// `release` it before the first `acquire` can succeed.
    pub fn new_acquired() -> Self {
        Self {
            sem: Semaphore::new(0),
        }
    }

    /// Whether the mutex is currently held, for diagnostics only.
    pub fn is_held(&self) -> bool {
        self.sem.available() == 0
    }

    pub fn acquire(&self) -> Result<(), Cancelled> {
        self.sem.acquire()
    }

    pub fn force_acquire(&self) {
        self.sem.force_acquire();
    }

    pub fn try_acquire(&self, timeout: Duration) -> Result<bool, Cancelled> {
        self.sem.try_acquire(timeout)
    }

    pub fn force_try_acquire(&self, timeout: Duration) -> bool {
        self.sem.force_try_acquire(timeout)
    }

    /// Releases the mutex; fails with [`ReleaseError::NotHeld`] on a
    /// double-release.
    pub fn release(&self) -> Result<(), ReleaseError> {
        self.release_many(1)
    }

    /// Releases the mutex; any `n != 1` fails with
    /// [`ReleaseError::InvalidCount`] before any state is touched.
    pub fn release_many(&self, n: usize) -> Result<(), ReleaseError> {
        if n != 1 {
            return Err(ReleaseError::InvalidCount(n));
        }
        if self.sem.release_capped(1, 1) {
            Ok(())
        } else {
            Err(ReleaseError::NotHeld)
        }
    }

    /// Forced counterpart of [`release`](Self::release); releases never
    /// block, so this differs only in intent at the call site.
    pub fn force_release(&self) -> Result<(), ReleaseError> {
        self.release()
    }

    /// Forced counterpart of [`release_many`](Self::release_many).
    pub fn force_release_many(&self, n: usize) -> Result<(), ReleaseError> {
        self.release_many(n)
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// A single-token mutex that grants the lock in strict arrival order.
///
/// This is the "turnstile" used by the reader-writer lock: acquired and
/// immediately force-released to serialize entry into a later stage.
pub struct FifoMutex {
    sem: FifoSemaphore,
}

impl FifoMutex {
    /// Creates an unheld mutex (one token).
    pub fn new() -> Self {
        Self {
            sem: FifoSemaphore::new(1),
        }
    }

    /// Creates a mutex that is already held (zero tokens).
    pub fn new_acquired() -> Self {
        Self {
            sem: FifoSemaphore::new(0),
        }
    }

    /// Whether the mutex is currently held, for diagnostics only.
    pub fn is_held(&self) -> bool {
        self.sem.available() == 0
    }

    pub fn acquire(&self) -> Result<(), Cancelled> {
        self.sem.acquire()
    }

    pub fn force_acquire(&self) {
        self.sem.force_acquire();
    }

    pub fn try_acquire(&self, timeout: Duration) -> Result<bool, Cancelled> {
        self.sem.try_acquire(timeout)
    }

    pub fn force_try_acquire(&self, timeout: Duration) -> bool {
        self.sem.force_try_acquire(timeout)
    }

    /// Releases the mutex; fails with [`ReleaseError::NotHeld`] on a
    /// double-release.
    pub fn release(&self) -> Result<(), ReleaseError> {
        self.release_many(1)
    }

    /// Releases the mutex; any `n != 1` fails with
    /// [`ReleaseError::InvalidCount`] before any state is touched.
    pub fn release_many(&self, n: usize) -> Result<(), ReleaseError> {
        if n != 1 {
            return Err(ReleaseError::InvalidCount(n));
        }
        if self.sem.release_capped(1, 1) {
            Ok(())
        } else {
            Err(ReleaseError::NotHeld)
        }
    }

    /// Forced counterpart of [`release`](Self::release).
    pub fn force_release(&self) -> Result<(), ReleaseError> {
        self.release()
    }

    /// Forced counterpart of [`release_many`](Self::release_many).
    pub fn force_release_many(&self, n: usize) -> Result<(), ReleaseError> {
        self.release_many(n)
    }
}

impl Default for FifoMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_token_round_trip() {
        let mutex = Mutex::new();
        assert_eq!(mutex.try_acquire(Duration::ZERO), Ok(true));
        assert_eq!(mutex.try_acquire(Duration::ZERO), Ok(false));
        assert_eq!(mutex.release(), Ok(()));
        assert_eq!(mutex.try_acquire(Duration::ZERO), Ok(true));
    }

    #[test]
    fn double_release_is_an_error() {
        let mutex = Mutex::new();
        assert_eq!(mutex.release(), Err(ReleaseError::NotHeld));

        mutex.force_acquire();
        assert_eq!(mutex.release(), Ok(()));
        assert_eq!(mutex.release(), Err(ReleaseError::NotHeld));
    }

    #[test]
    fn release_many_requires_exactly_one() {
        let mutex = Mutex::new();
        mutex.force_acquire();
        assert_eq!(mutex.release_many(2), Err(ReleaseError::InvalidCount(2)));
        assert_eq!(mutex.release_many(0), Err(ReleaseError::InvalidCount(0)));
        // The invalid calls must not have released anything.
        assert!(mutex.is_held());
        assert_eq!(mutex.release_many(1), Ok(()));
    }

    #[test]
    fn acquired_constructor_starts_held() {
        let mutex = FifoMutex::new_acquired();
        assert!(mutex.is_held());
        assert_eq!(mutex.try_acquire(Duration::ZERO), Ok(false));
        assert_eq!(mutex.release(), Ok(()));
        assert_eq!(mutex.try_acquire(Duration::ZERO), Ok(true));
    }

    #[test]
    fn fifo_mutex_detects_double_release() {
        let mutex = FifoMutex::new();
        assert_eq!(mutex.release(), Err(ReleaseError::NotHeld));
        assert_eq!(mutex.release_many(3), Err(ReleaseError::InvalidCount(3)));
    }
}
