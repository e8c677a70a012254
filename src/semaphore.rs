//! Counting semaphores, plain and strict-FIFO.
//!
//! [`Semaphore`] is the foundational primitive of the crate: a blocking
//! token counter with no ordering promise between concurrent waiters.
//! [`FifoSemaphore`] adds a hard guarantee that tokens are granted in the
//! exact order the acquirers entered the internal critical section, which is
//! what the reader-writer turnstiles are built on.
//!
//! Every blocking operation comes in a cancellable and a forced form; see
//! the [`cancel`](crate::cancel) module for the contract.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cancel::{self, CancelToken, Cancelled, WaitSite};

struct SemState {
    tokens: usize,
}

struct SemInner {
    state: Mutex<SemState>,
    available: Condvar,
}

impl WaitSite for SemInner {
    fn interrupt(&self) {
        let _guard = self.state.lock();
        self.available.notify_all();
    }
}

/// A counting semaphore with no fairness guarantee.
///
/// A technically-later arrival may be served before an earlier one; use
/// [`FifoSemaphore`] when service order matters.
pub struct Semaphore {
    inner: Arc<SemInner>,
}

impl Semaphore {
    /// Creates a semaphore holding `tokens` tokens.
    pub fn new(tokens: usize) -> Self {
        Self {
            inner: Arc::new(SemInner {
                state: Mutex::new(SemState { tokens }),
                available: Condvar::new(),
            }),
        }
    }

    /// Snapshot of the current token count, for diagnostics only.
    pub fn available(&self) -> usize {
        self.inner.state.lock().tokens
    }

    /// Claims one token, waiting as long as it takes.
    pub fn acquire(&self) -> Result<(), Cancelled> {
        self.acquire_inner(cancel::current().as_ref())
    }

    /// Like [`acquire`](Self::acquire), but immune to cancellation: the
    /// token is always claimed, and a cancellation delivered during the wait
    /// stays pending for the next cancellable call.
    pub fn force_acquire(&self) {
        self.acquire_inner(None)
            .expect("forced wait is uncancellable");
    }

    /// Claims one token if it becomes available before `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout with no state change. The deadline is
    /// wall-clock based and re-measured after every spurious wake;
    /// `Duration::ZERO` makes this a non-blocking attempt.
    pub fn try_acquire(&self, timeout: Duration) -> Result<bool, Cancelled> {
        self.try_acquire_inner(timeout, cancel::current().as_ref())
    }

    /// Forced counterpart of [`try_acquire`](Self::try_acquire).
    pub fn force_try_acquire(&self, timeout: Duration) -> bool {
        self.try_acquire_inner(timeout, None)
            .expect("forced wait is uncancellable")
    }

    /// Returns one token and wakes one waiter.
    pub fn release(&self) {
        self.release_many(1);
    }

    /// Returns `n` tokens atomically and wakes up to `n` waiters, one per
    /// token. `release_many(0)` is a no-op.
    pub fn release_many(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut state = self.inner.state.lock();
        state.tokens = state.tokens.saturating_add(n);
        drop(state);
        for _ in 0..n {
            if !self.inner.available.notify_one() {
                break;
            }
        }
    }

    /// Forced counterpart of [`release`](Self::release). Releases never
    /// block in this implementation, so this always completes.
    pub fn force_release(&self) {
        self.release();
    }

    /// Forced counterpart of [`release_many`](Self::release_many).
    pub fn force_release_many(&self, n: usize) {
        self.release_many(n);
    }

    /// Returns `n` tokens unless that would exceed `cap`. Used by the mutex
    /// layer for double-release detection.
    pub(crate) fn release_capped(&self, n: usize, cap: usize) -> bool {
        let mut state = self.inner.state.lock();
        if state.tokens + n > cap {
            return false;
        }
        state.tokens += n;
        drop(state);
        for _ in 0..n {
            if !self.inner.available.notify_one() {
                break;
            }
        }
        true
    }

    fn acquire_inner(&self, token: Option<&CancelToken>) -> Result<(), Cancelled> {
        let _reg =
            token.map(|t| t.begin_wait(Arc::downgrade(&self.inner) as Weak<dyn WaitSite>));
        let mut state = self.inner.state.lock();
        loop {
            cancel::consume_if_cancelled(token)?;
            if state.tokens > 0 {
                state.tokens -= 1;
                return Ok(());
            }
            self.inner.available.wait(&mut state);
        }
    }

    fn try_acquire_inner(
        &self,
        timeout: Duration,
        token: Option<&CancelToken>,
    ) -> Result<bool, Cancelled> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            // Timeout too large to represent: same as an infinite wait.
            return self.acquire_inner(token).map(|()| true);
        };
        let _reg =
            token.map(|t| t.begin_wait(Arc::downgrade(&self.inner) as Weak<dyn WaitSite>));
        let mut state = self.inner.state.lock();
        loop {
            cancel::consume_if_cancelled(token)?;
            if state.tokens > 0 {
                state.tokens -= 1;
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            self.inner.available.wait_until(&mut state, deadline);
        }
    }
}

struct FifoState {
    tokens: usize,
    /// Waiter ids in arrival order; only the front may claim a token.
    queue: VecDeque<u64>,
    next_id: u64,
}

impl FifoState {
    fn grant(&mut self, id: u64) -> bool {
        if self.tokens > 0 && self.queue.front() == Some(&id) {
            self.queue.pop_front();
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Removes a waiter that gave up (timeout or cancellation).
    fn retire(&mut self, id: u64) {
        if let Some(pos) = self.queue.iter().position(|&queued| queued == id) {
            self.queue.remove(pos);
        }
    }
}

struct FifoInner {
    state: Mutex<FifoState>,
    available: Condvar,
}

impl WaitSite for FifoInner {
    fn interrupt(&self) {
        let _guard = self.state.lock();
        self.available.notify_all();
    }
}

/// A counting semaphore that serves acquirers strictly first-in-first-out.
///
/// A thread is in line from the moment it enters the internal critical
/// section, independent of the wake order of the underlying condition
/// variable. This is the ordering gate ("turnstile") the reader-writer lock
/// is composed from.
pub struct FifoSemaphore {
    inner: Arc<FifoInner>,
}

impl FifoSemaphore {
    /// Creates a semaphore holding `tokens` tokens.
    pub fn new(tokens: usize) -> Self {
        Self {
            inner: Arc::new(FifoInner {
                state: Mutex::new(FifoState {
                    tokens,
                    queue: VecDeque::new(),
                    next_id: 0,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Snapshot of the current token count, for diagnostics only.
    pub fn available(&self) -> usize {
        self.inner.state.lock().tokens
    }

    /// Number of threads currently waiting in line, for diagnostics only.
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Claims one token, waiting in line as long as it takes.
    pub fn acquire(&self) -> Result<(), Cancelled> {
        self.acquire_inner(cancel::current().as_ref())
    }

    /// Cancellation-immune counterpart of [`acquire`](Self::acquire).
    pub fn force_acquire(&self) {
        self.acquire_inner(None)
            .expect("forced wait is uncancellable");
    }

    /// Claims one token if this thread reaches the front of the line and a
    /// token is free before `timeout` elapses; `Ok(false)` on timeout.
    pub fn try_acquire(&self, timeout: Duration) -> Result<bool, Cancelled> {
        self.try_acquire_inner(timeout, cancel::current().as_ref())
    }

    /// Forced counterpart of [`try_acquire`](Self::try_acquire).
    pub fn force_try_acquire(&self, timeout: Duration) -> bool {
        self.try_acquire_inner(timeout, None)
            .expect("forced wait is uncancellable")
    }

    /// Returns one token; the waiter at the front of the line gets it.
    pub fn release(&self) {
        self.release_many(1);
    }

    /// Returns `n` tokens atomically. Waiters are woken collectively and
    /// filtered by the queue, so grant order stays arrival order.
    pub fn release_many(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut state = self.inner.state.lock();
        state.tokens = state.tokens.saturating_add(n);
        let waiters = !state.queue.is_empty();
        drop(state);
        if waiters {
            self.inner.available.notify_all();
        }
    }

    /// Forced counterpart of [`release`](Self::release).
    pub fn force_release(&self) {
        self.release();
    }

    /// Forced counterpart of [`release_many`](Self::release_many).
    pub fn force_release_many(&self, n: usize) {
        self.release_many(n);
    }

    /// See [`Semaphore::release_capped`].
    pub(crate) fn release_capped(&self, n: usize, cap: usize) -> bool {
        let mut state = self.inner.state.lock();
        if state.tokens + n > cap {
            return false;
        }
        state.tokens += n;
        let waiters = !state.queue.is_empty();
        drop(state);
        if waiters {
            self.inner.available.notify_all();
        }
        true
    }

    fn acquire_inner(&self, token: Option<&CancelToken>) -> Result<(), Cancelled> {
        let _reg =
            token.map(|t| t.begin_wait(Arc::downgrade(&self.inner) as Weak<dyn WaitSite>));
        let mut state = self.inner.state.lock();
        // Cancelled before joining the line: nothing to undo.
        cancel::consume_if_cancelled(token)?;
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        state.queue.push_back(id);
        loop {
            if state.grant(id) {
                self.cascade(&mut state);
                return Ok(());
            }
            self.inner.available.wait(&mut state);
            if let Err(cancelled) = cancel::consume_if_cancelled(token) {
                state.retire(id);
                // The front may have changed; let the new front re-check.
                self.inner.available.notify_all();
                return Err(cancelled);
            }
        }
    }

    fn try_acquire_inner(
        &self,
        timeout: Duration,
        token: Option<&CancelToken>,
    ) -> Result<bool, Cancelled> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.acquire_inner(token).map(|()| true);
        };
        let _reg =
            token.map(|t| t.begin_wait(Arc::downgrade(&self.inner) as Weak<dyn WaitSite>));
        let mut state = self.inner.state.lock();
        cancel::consume_if_cancelled(token)?;
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        state.queue.push_back(id);
        loop {
            if state.grant(id) {
                self.cascade(&mut state);
                return Ok(true);
            }
            if Instant::now() >= deadline {
                state.retire(id);
                self.inner.available.notify_all();
                return Ok(false);
            }
            self.inner.available.wait_until(&mut state, deadline);
            if let Err(cancelled) = cancel::consume_if_cancelled(token) {
                state.retire(id);
                self.inner.available.notify_all();
                return Err(cancelled);
            }
        }
    }

    /// After a grant, tokens may remain for the next waiter in line; without
    /// this, `release_many(n)` satisfying several waiters would leave the
    /// later ones asleep.
    fn cascade(&self, state: &mut FifoState) {
        if state.tokens > 0 && !state.queue.is_empty() {
            self.inner.available.notify_all();
        }
    }
}
