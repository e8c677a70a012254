//! Active objects: one unit of logic, one dedicated thread.
//!
//! An [`ActiveObject`] wraps a [`Runnable`] and a worker thread with a
//! `Created → Running → Stopped` lifecycle (terminal, no restart). Stopping
//! is delegated to a pluggable [`StopStrategy`]:
//!
//! - [`FlagStop`] sets a cooperative flag the run logic polls at safe
//!   points;
//! - [`InterruptStop`] cancels the worker's [`CancelToken`], so pending
//!   blocking calls from this crate abort with
//!   [`Cancelled`](crate::Cancelled).
//!
//! The "stopped" hook fires exactly once, from the worker thread, when the
//! run logic returns normally. A panic escaping the run logic kills the
//! worker and deliberately skips the hook: recovery policy belongs to the
//! run logic, not to this wrapper.

use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::cancel::{self, CancelToken};

/// Errors produced by lifecycle misuse or thread spawning.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("active object already started")]
    AlreadyStarted,
    #[error("active object not started")]
    NotStarted,
    #[error("active object already joined")]
    AlreadyJoined,
    #[error("active object worker panicked")]
    WorkerPanicked,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// How an active object is asked to stop.
pub trait StopStrategy: Send + Sync + 'static {
    /// Signals the worker; must be safe to call more than once.
    fn request_stop(&self);

    /// Whether a stop has been requested. Observed by the run logic via
    /// [`RunContext::stop_requested`].
    fn stop_requested(&self) -> bool;

    /// Token to install on the worker thread at start, for strategies that
    /// cancel blocking calls.
    fn worker_token(&self) -> Option<CancelToken> {
        None
    }
}

/// Cooperative-flag strategy: the run logic polls and exits on its own.
pub struct FlagStop {
    flag: AtomicBool,
}

impl FlagStop {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }
}

impl Default for FlagStop {
    fn default() -> Self {
        Self::new()
    }
}

impl StopStrategy for FlagStop {
    fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Interrupt strategy: cancels the worker's token so each blocking call in
/// the run logic observes [`Cancelled`](crate::Cancelled) and can exit.
pub struct InterruptStop {
    requested: AtomicBool,
    token: CancelToken,
}

impl InterruptStop {
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            token: CancelToken::new(),
        }
    }

    /// The token this strategy cancels; exposed for composition in tests
    /// and diagnostics.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Default for InterruptStop {
    fn default() -> Self {
        Self::new()
    }
}

impl StopStrategy for InterruptStop {
    fn request_stop(&self) {
        // The flag is tracked separately because a blocking call consumes
        // the token's mark when it aborts.
        self.requested.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    fn stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn worker_token(&self) -> Option<CancelToken> {
        Some(self.token.clone())
    }
}

/// Handed to the run logic; its only job is exposing the stop request.
pub struct RunContext {
    strategy: Arc<dyn StopStrategy>,
}

impl RunContext {
    /// Safe point check: whether the object has been asked to stop.
    pub fn stop_requested(&self) -> bool {
        self.strategy.stop_requested()
    }
}

/// The unit of logic an active object executes on its worker thread.
pub trait Runnable: Send + 'static {
    fn run(&mut self, ctx: &RunContext);
}

impl<F> Runnable for F
where
    F: FnMut(&RunContext) + Send + 'static,
{
    fn run(&mut self, ctx: &RunContext) {
        self(ctx);
    }
}

/// Callback fired exactly once, from the worker thread, on normal
/// completion of the run logic.
pub type StoppedHook = Arc<dyn Fn() + Send + Sync>;

/// Latch the worker sets when the run logic returns normally; timed joins
/// wait on it.
struct StoppedEvent {
    done: Mutex<bool>,
    fired: Condvar,
}

impl StoppedEvent {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            fired: Condvar::new(),
        }
    }

    fn fire(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.fired.notify_all();
    }

    fn wait_until(&self, deadline: Instant) -> bool {
        let mut done = self.done.lock();
        loop {
            if *done {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.fired.wait_until(&mut done, deadline);
        }
    }
}

enum HandleState {
    Created,
    Running(JoinHandle<()>),
    Joined,
}

static NEXT_WORKER: AtomicU64 = AtomicU64::new(0);

/// A lifecycle wrapper around one dedicated worker thread.
pub struct ActiveObject {
    name: String,
    strategy: Arc<dyn StopStrategy>,
    behavior: Mutex<Option<Box<dyn Runnable>>>,
    stopped: Arc<StoppedEvent>,
    hook: Option<StoppedHook>,
    handle: Mutex<HandleState>,
}

impl ActiveObject {
    /// Creates an active object with a default-named worker.
    pub fn new(strategy: impl StopStrategy, behavior: impl Runnable) -> Self {
        Self::builder().build(strategy, behavior)
    }

    pub fn builder() -> Builder {
        Builder {
            name: None,
            hook: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launches the worker thread. Fails with
    /// [`LifecycleError::AlreadyStarted`] on any call after the first.
    pub fn start(&self) -> Result<(), LifecycleError> {
        let mut slot = self.behavior.lock();
        let Some(mut behavior) = slot.take() else {
            return Err(LifecycleError::AlreadyStarted);
        };

        let strategy = Arc::clone(&self.strategy);
        let stopped = Arc::clone(&self.stopped);
        let hook = self.hook.clone();
        let name = self.name.clone();
        let handle = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _token = strategy.worker_token().map(cancel::install);
                let ctx = RunContext {
                    strategy: Arc::clone(&strategy),
                };
                log::debug!("active object `{name}` running");
                behavior.run(&ctx);
                // Reached only on normal return; a panic in the run logic
                // unwinds past and the stopped notification never fires.
                if let Some(hook) = &hook {
                    hook();
                }
                stopped.fire();
                log::debug!("active object `{name}` stopped");
            })?;

        *self.handle.lock() = HandleState::Running(handle);
        Ok(())
    }

    /// Signals the stop strategy and returns immediately.
    pub fn request_stop(&self) {
        log::debug!("active object `{}` stop requested", self.name);
        self.strategy.request_stop();
    }

    /// Signals the stop strategy, then waits up to `timeout` for the run
    /// logic to complete; `Ok(false)` means it was still running.
    pub fn request_stop_within(&self, timeout: Duration) -> Result<bool, LifecycleError> {
        self.request_stop();
        self.join_within(timeout)
    }

    /// Blocks until the worker thread exits. Returns only after the stopped
    /// notification has fired on the normal-completion path.
    pub fn join(&self) -> Result<(), LifecycleError> {
        let mut state = self.handle.lock();
        match mem::replace(&mut *state, HandleState::Joined) {
            HandleState::Created => {
                *state = HandleState::Created;
                Err(LifecycleError::NotStarted)
            }
            HandleState::Joined => Err(LifecycleError::AlreadyJoined),
            HandleState::Running(handle) => {
                drop(state);
                handle.join().map_err(|_| LifecycleError::WorkerPanicked)
            }
        }
    }

    /// Waits up to `timeout` for the run logic to complete without
    /// consuming the join handle; `join` may still be called afterwards.
    pub fn join_within(&self, timeout: Duration) -> Result<bool, LifecycleError> {
        if matches!(&*self.handle.lock(), HandleState::Created) {
            return Err(LifecycleError::NotStarted);
        }
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(u32::MAX as u64));
        Ok(self.stopped.wait_until(deadline))
    }
}

/// Configures thread name and stopped hook before construction.
pub struct Builder {
    name: Option<String>,
    hook: Option<StoppedHook>,
}

impl Builder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Registers the hook fired on normal completion of the run logic.
    pub fn on_stopped<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn build(self, strategy: impl StopStrategy, behavior: impl Runnable) -> ActiveObject {
        let name = self.name.unwrap_or_else(|| {
            format!("qsync-worker-{}", NEXT_WORKER.fetch_add(1, Ordering::Relaxed))
        });
        ActiveObject {
            name,
            strategy: Arc::new(strategy),
            behavior: Mutex::new(Some(Box::new(behavior))),
            stopped: Arc::new(StoppedEvent::new()),
            hook: self.hook,
            handle: Mutex::new(HandleState::Created),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_twice_is_an_error() {
        let ao = ActiveObject::new(FlagStop::new(), |_ctx: &RunContext| {});
        ao.start().expect("first start");
        assert!(matches!(ao.start(), Err(LifecycleError::AlreadyStarted)));
        ao.join().expect("worker completed");
    }

    #[test]
    fn join_before_start_is_an_error() {
        let ao = ActiveObject::new(FlagStop::new(), |_ctx: &RunContext| {});
        assert!(matches!(ao.join(), Err(LifecycleError::NotStarted)));
        assert!(matches!(
            ao.join_within(Duration::ZERO),
            Err(LifecycleError::NotStarted)
        ));
    }

    #[test]
    fn join_twice_is_an_error() {
        let ao = ActiveObject::new(FlagStop::new(), |_ctx: &RunContext| {});
        ao.start().expect("start");
        ao.join().expect("first join");
        assert!(matches!(ao.join(), Err(LifecycleError::AlreadyJoined)));
    }

    #[test]
    fn flag_stop_is_observable_from_the_run_logic() {
        let strategy = FlagStop::new();
        strategy.request_stop();
        assert!(strategy.stop_requested());
    }

    #[test]
    fn interrupt_stop_survives_mark_consumption() {
        let strategy = InterruptStop::new();
        strategy.request_stop();
        assert!(strategy.token().take_cancelled());
        // The stop request outlives the consumed mark.
        assert!(strategy.stop_requested());
    }
}
