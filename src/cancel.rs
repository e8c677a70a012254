//! Cooperative cancellation for blocking operations.
//!
//! Threads cannot be interrupted from the outside, so the crate carries its
//! own mechanism: a [`CancelToken`] installed on a thread marks that thread
//! cancellable, and every cancellable blocking operation in this crate
//! observes the token of the calling thread.
//!
//! The cancelled mark is *sticky*: it stays pending until a cancellable
//! blocking operation consumes it by returning [`Cancelled`]. Forced
//! operations (`force_*`) never consume the mark, so a cancellation absorbed
//! during a forced wait is re-delivered by the next cancellable call.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;

/// Error returned when a cancellable blocking operation aborts its wait.
///
/// No observable state has changed when this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("blocking operation cancelled")]
pub struct Cancelled;

/// A place a thread can block on.
///
/// Blocking primitives register the site a thread is about to sleep on;
/// `CancelToken::cancel` interrupts it. Implementations must take the same
/// guard the sleeping thread holds before notifying, so a wakeup issued
/// between the thread's last mark check and its wait cannot be lost.
pub(crate) trait WaitSite: Send + Sync {
    fn interrupt(&self);
}

struct TokenInner {
    cancelled: AtomicBool,
    site: Mutex<Option<Weak<dyn WaitSite>>>,
}

/// Handle used to cancel the thread it is installed on.
///
/// Tokens are cheap to clone; all clones share the same mark. A token is
/// meant to be observed by a single thread (the one it is installed on via
/// [`install`]), while any thread may call [`CancelToken::cancel`].
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                site: Mutex::new(None),
            }),
        }
    }

    /// Marks the token cancelled and wakes the wait (if any) in progress
    /// under it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let site = self.inner.site.lock().clone();
        if let Some(site) = site.and_then(|weak| weak.upgrade()) {
            site.interrupt();
        }
        log::trace!("cancel token marked");
    }

    /// Returns whether the mark is pending, without consuming it.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Consumes a pending mark. Only cancellable blocking operations call
    /// this; forced operations leave the mark for the next cancellable call.
    pub(crate) fn take_cancelled(&self) -> bool {
        self.inner.cancelled.swap(false, Ordering::SeqCst)
    }

    /// Publishes the site the calling thread is about to block on. The
    /// registration is withdrawn when the returned guard drops.
    pub(crate) fn begin_wait(&self, site: Weak<dyn WaitSite>) -> WaitRegistration<'_> {
        *self.inner.site.lock() = Some(site);
        WaitRegistration { token: self }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Clears the wait-site registration on drop.
pub(crate) struct WaitRegistration<'a> {
    token: &'a CancelToken,
}

impl Drop for WaitRegistration<'_> {
    fn drop(&mut self) {
        *self.token.inner.site.lock() = None;
    }
}

/// Returns `Err(Cancelled)` and consumes the mark if the given token is
/// cancelled. A thread without a token is never cancellable.
pub(crate) fn consume_if_cancelled(token: Option<&CancelToken>) -> Result<(), Cancelled> {
    match token {
        Some(token) if token.take_cancelled() => Err(Cancelled),
        _ => Ok(()),
    }
}

thread_local! {
    static CURRENT: RefCell<Option<CancelToken>> = const { RefCell::new(None) };
}

/// Associates `token` with the calling thread until the returned guard
/// drops, restoring whatever was installed before.
pub fn install(token: CancelToken) -> InstalledToken {
    let previous = CURRENT.with(|current| current.borrow_mut().replace(token));
    InstalledToken { previous }
}

/// The calling thread's token, if one is installed.
pub fn current() -> Option<CancelToken> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Guard returned by [`install`].
#[must_use = "dropping the guard uninstalls the token"]
pub struct InstalledToken {
    previous: Option<CancelToken>,
}

impl Drop for InstalledToken {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}
