//! # qsync
//!
//! Blocking concurrency primitives for thread-per-task programs: counting
//! semaphores (plain and strict-FIFO), single-token mutexes, a fair
//! reader-writer lock built from turnstiles, an unbounded lock-split FIFO
//! channel, and an active-object wrapper tying one unit of logic to one
//! dedicated thread.
//!
//! Every blocking operation comes in two flavors: the plain form aborts with
//! [`Cancelled`] when the calling thread's installed [`CancelToken`] carries
//! a pending mark, and the `force_*` form waits through cancellation and
//! leaves the mark pending for the next plain call.
//!
//! ## Module Overview
//! - [`cancel`]    – Sticky cancellation marks and per-thread installation.
//! - [`semaphore`] – Counting semaphores, unordered and strict-FIFO.
//! - [`mutex`]     – Single-token mutexes with double-release detection.
//! - [`rwlock`]    – Fair reader-writer lock over two FIFO turnstiles.
//! - [`channel`]   – Unbounded FIFO channel with split put/take locks.
//! - [`active`]    – Active objects with pluggable stop strategies.
//!
//! The crate keeps modules loosely coupled so that the primitives compose:
//! the reader-writer lock is built entirely from the mutexes, which are
//! built from the semaphores.

pub mod active;
pub mod cancel;
pub mod channel;
pub mod mutex;
pub mod rwlock;
pub mod semaphore;
pub use active::{
    ActiveObject, Builder, FlagStop, InterruptStop, LifecycleError, RunContext, Runnable,
    StopStrategy, StoppedHook,
};
pub use cancel::{CancelToken, Cancelled, InstalledToken};
pub use channel::Channel;
pub use mutex::{FifoMutex, Mutex, ReleaseError};
pub use rwlock::{ReadGuard, RwLock, WriteGuard};
pub use semaphore::{FifoSemaphore, Semaphore};
#[cfg(test)]
mod tests;
