//! Unbounded lock-split FIFO channel.
//!
//! A singly linked list with independent put-side and take-side locks. The
//! head of the list is the "blank-first" sentinel: a node whose item has
//! already been consumed, marking the frontier. Each node carries its own
//! monitor (mutex + condvar); the two sides contend on the same node only
//! at the instant the channel flips from empty to non-empty, which is the
//! point of lock splitting.
//!
//! Capacity is unbounded and `put` never blocks; callers needing
//! backpressure compose a [`Semaphore`](crate::Semaphore) alongside.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::cancel::{self, CancelToken, Cancelled, WaitSite};

struct Slot<T> {
    item: Option<T>,
    next: Option<Arc<Node<T>>>,
}

/// A list node doubling as the monitor takers park on when it is the
/// blank-first sentinel.
struct Node<T> {
    slot: Mutex<Slot<T>>,
    filled: Condvar,
}

impl<T> Node<T> {
    fn new(item: Option<T>) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot { item, next: None }),
            filled: Condvar::new(),
        })
    }
}

impl<T: Send> WaitSite for Node<T> {
    fn interrupt(&self) {
        let _guard = self.slot.lock();
        self.filled.notify_all();
    }
}

/// An unbounded FIFO channel with split put/take locks.
///
/// Items are delivered in put order regardless of how many producer or
/// consumer threads are involved.
pub struct Channel<T> {
    /// Guards the enqueue side and owns the tail pointer.
    put_side: Mutex<Arc<Node<T>>>,
    /// Guards the dequeue side and owns the blank-first pointer.
    take_side: Mutex<Arc<Node<T>>>,
    /// Item count kept outside the side locks so [`is_empty`](Self::is_empty)
    /// never parks behind a blocked taker.
    len: AtomicUsize,
}

impl<T: Send + 'static> Channel<T> {
    pub fn new() -> Self {
        let sentinel = Node::new(None);
        Self {
            put_side: Mutex::new(Arc::clone(&sentinel)),
            take_side: Mutex::new(sentinel),
            len: AtomicUsize::new(0),
        }
    }

    /// Appends `item` and returns immediately; never blocks on capacity.
    pub fn put(&self, item: T) {
        let node = Node::new(Some(item));
        let mut tail = self.put_side.lock();
        {
            let mut slot = tail.slot.lock();
            slot.next = Some(Arc::clone(&node));
            // If the tail is the blank-first sentinel a taker may be parked
            // on it; on a non-empty channel nobody waits here and the
            // notify is a no-op.
            tail.filled.notify_one();
        }
        *tail = node;
        self.len.fetch_add(1, Ordering::SeqCst);
    }

    /// Removes and returns the oldest item, blocking until one exists.
    pub fn take(&self) -> Result<T, Cancelled> {
        self.take_inner(cancel::current().as_ref())
    }

    /// Cancellation-immune counterpart of [`take`](Self::take).
    pub fn force_take(&self) -> T {
        self.take_inner(None)
            .expect("forced wait is uncancellable")
    }

    /// Whether the channel currently holds no items. Approximate under
    /// concurrency and never blocks; for diagnostics only.
    pub fn is_empty(&self) -> bool {
        self.len.load(Ordering::SeqCst) == 0
    }

    fn take_inner(&self, token: Option<&CancelToken>) -> Result<T, Cancelled> {
        let mut front = self.take_side.lock();
        let sentinel = Arc::clone(&*front);
        let _reg =
            token.map(|t| t.begin_wait(Arc::downgrade(&sentinel) as Weak<dyn WaitSite>));

        let next = {
            let mut slot = sentinel.slot.lock();
            loop {
                cancel::consume_if_cancelled(token)?;
                if let Some(next) = slot.next.clone() {
                    break next;
                }
                sentinel.filled.wait(&mut slot);
            }
        };

        // The successor's item moves out and its slot is cleared right away
        // so the channel retains no reference; the emptied node becomes the
        // new blank-first sentinel.
        let item = {
            let mut slot = next.slot.lock();
            slot.item.take().expect("channel node already consumed")
        };
        *front = next;
        self.len.fetch_sub(1, Ordering::SeqCst);
        Ok(item)
    }
}

impl<T: Send + 'static> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Channel<T> {
    fn drop(&mut self) {
        // Sever the links one node at a time; letting the `Arc` chain unwind
        // on its own recurses once per queued item and a deep backlog blows
        // the stack.
        let mut node = Arc::clone(&*self.take_side.lock());
        loop {
            let next = node.slot.lock().next.take();
            match next {
                Some(next) => node = next,
                None => break,
            }
        }
    }
}
