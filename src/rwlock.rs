//! Reader-writer lock composed from two FIFO turnstiles.
//!
//! Readers pass through a turnstile (acquire then immediately force-release)
//! purely to serialize their entry against a pending writer; the first
//! reader in takes the write lock on behalf of all readers and the last one
//! out returns it. A writer holds both turnstiles for the duration of the
//! write, so readers arriving behind it queue at the readers turnstile and
//! are all admitted together when the writer leaves, ahead of any later
//! writer. That keeps read concurrency high without letting writers starve.
//!
//! Acquiring read-under-write (or write-under-read) on the same thread is a
//! caller error: this lock is not reentrant and such a call deadlocks.

use parking_lot::Mutex as ParkingMutex;

use crate::cancel::Cancelled;
use crate::mutex::{FifoMutex, Mutex, ReleaseError};

/// A fair reader-writer lock: any number of concurrent readers, one
/// exclusive writer.
pub struct RwLock {
    /// Ordering gate readers pass through; held by a writer for the whole
    /// write so queued readers wait here, not on the write lock.
    readers: FifoMutex,
    /// Keeps a second writer from overtaking readers queued behind the
    /// first.
    writers: FifoMutex,
    /// The writer-exclusive resource; held by the reader group while any
    /// reader is inside.
    write_lock: Mutex,
    reader_count: ParkingMutex<usize>,
}

impl RwLock {
    pub fn new() -> Self {
        Self {
            readers: FifoMutex::new(),
            writers: FifoMutex::new(),
            write_lock: Mutex::new(),
            reader_count: ParkingMutex::new(0),
        }
    }

    /// Number of readers currently inside, for diagnostics only.
    pub fn readers(&self) -> usize {
        *self.reader_count.lock()
    }

    /// Acquires the lock for reading.
    ///
    /// Cancellation leaves the lock unchanged: a reader cancelled while the
    /// group is taking the write lock first backs its count increment out.
    pub fn acquire_read(&self) -> Result<(), Cancelled> {
        self.readers.acquire()?;
        self.pass_readers_turnstile();

        let mut count = self.reader_count.lock();
        *count += 1;
        if *count == 1 {
            // First reader in: claim the writer-exclusive resource for the
            // whole reader group.
            if let Err(cancelled) = self.write_lock.acquire() {
                *count -= 1;
                return Err(cancelled);
            }
        }
        Ok(())
    }

    /// Cancellation-immune counterpart of [`acquire_read`](Self::acquire_read).
    pub fn force_acquire_read(&self) {
        self.readers.force_acquire();
        self.pass_readers_turnstile();

        let mut count = self.reader_count.lock();
        *count += 1;
        if *count == 1 {
            self.write_lock.force_acquire();
        }
    }

    /// Releases a read acquisition. Always forced: a release is never left
    /// half-done.
    pub fn release_read(&self) -> Result<(), ReleaseError> {
        let mut count = self.reader_count.lock();
        if *count == 0 {
            return Err(ReleaseError::NotHeld);
        }
        *count -= 1;
        if *count == 0 {
            // Last reader out returns the writer-exclusive resource.
            self.write_lock.force_release()?;
        }
        Ok(())
    }

    /// Acquires the lock for writing.
    ///
    /// On cancellation partway through, every turnstile already taken by
    /// this call is force-released before the error propagates.
    pub fn acquire_write(&self) -> Result<(), Cancelled> {
        self.writers.acquire()?;
        if let Err(cancelled) = self.readers.acquire() {
            self.release_turnstile(&self.writers);
            return Err(cancelled);
        }
        if let Err(cancelled) = self.write_lock.acquire() {
            self.release_turnstile(&self.readers);
            self.release_turnstile(&self.writers);
            return Err(cancelled);
        }
        Ok(())
    }

    /// Cancellation-immune counterpart of [`acquire_write`](Self::acquire_write).
    pub fn force_acquire_write(&self) {
        self.writers.force_acquire();
        self.readers.force_acquire();
        self.write_lock.force_acquire();
    }

    /// Releases a write acquisition: write lock first, then the readers
    /// turnstile (admitting the whole queued reader group), then the
    /// writers turnstile. Always forced.
    pub fn release_write(&self) -> Result<(), ReleaseError> {
        self.write_lock.force_release()?;
        self.readers.force_release()?;
        self.writers.force_release()?;
        Ok(())
    }

    /// Acquires for reading and returns a guard that force-releases exactly
    /// once when dropped.
    pub fn acquire_read_scoped(&self) -> Result<ReadGuard<'_>, Cancelled> {
        self.acquire_read()?;
        Ok(ReadGuard {
            lock: self,
            released: false,
        })
    }

    /// Acquires for writing and returns a guard that force-releases exactly
    /// once when dropped.
    pub fn acquire_write_scoped(&self) -> Result<WriteGuard<'_>, Cancelled> {
        self.acquire_write()?;
        Ok(WriteGuard {
            lock: self,
            released: false,
        })
    }

    /// The turnstile exists to order entry, not to be held: acquire then
    /// immediately force-release.
    fn pass_readers_turnstile(&self) {
        self.release_turnstile(&self.readers);
    }

    fn release_turnstile(&self, turnstile: &FifoMutex) {
        turnstile
            .force_release()
            .expect("turnstile released while not held");
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped read acquisition; the release runs exactly once.
#[must_use = "dropping the guard releases the read lock immediately"]
pub struct ReadGuard<'a> {
    lock: &'a RwLock,
    released: bool,
}

impl ReadGuard<'_> {
    /// Releases eagerly instead of at end of scope.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            let _ = self.lock.release_read();
        }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// Scoped write acquisition; the release runs exactly once.
#[must_use = "dropping the guard releases the write lock immediately"]
pub struct WriteGuard<'a> {
    lock: &'a RwLock,
    released: bool,
}

impl WriteGuard<'_> {
    /// Releases eagerly instead of at end of scope.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            let _ = self.lock.release_write();
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_share_writers_exclude() {
        let lock = RwLock::new();
        lock.acquire_read().expect("no token installed");
        lock.acquire_read().expect("no token installed");
        assert_eq!(lock.readers(), 2);

        lock.release_read().expect("read held");
        lock.release_read().expect("read held");
        assert_eq!(lock.readers(), 0);

        lock.acquire_write().expect("no token installed");
        lock.release_write().expect("write held");
    }

    #[test]
    fn release_read_without_acquire_is_an_error() {
        let lock = RwLock::new();
        assert_eq!(lock.release_read(), Err(ReleaseError::NotHeld));
    }

    #[test]
    fn release_write_without_acquire_is_an_error() {
        let lock = RwLock::new();
        assert_eq!(lock.release_write(), Err(ReleaseError::NotHeld));
    }

    #[test]
    fn scoped_guard_releases_once() {
        let lock = RwLock::new();
        {
            let guard = lock.acquire_read_scoped().expect("no token installed");
            assert_eq!(lock.readers(), 1);
            guard.release();
            assert_eq!(lock.readers(), 0);
        }
        // Drop after explicit release must not double-release.
        assert_eq!(lock.release_read(), Err(ReleaseError::NotHeld));

        {
            let _guard = lock.acquire_write_scoped().expect("no token installed");
        }
        lock.acquire_write().expect("write released by guard drop");
        lock.release_write().expect("write held");
    }
}
