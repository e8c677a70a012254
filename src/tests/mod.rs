//! Cross-module tests exercising the primitives from multiple threads.

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

mod active;
mod channel;

/// Upper bound for waits that should complete almost immediately; generous
/// so loaded CI machines do not flake.
static LONG_WAIT: Lazy<Duration> = Lazy::new(|| Duration::from_secs(5));

/// Spins until `cond` holds, panicking after [`LONG_WAIT`].
fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + *LONG_WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}
