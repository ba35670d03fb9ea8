//! Thread synchronization primitives shared by the engine and controller.
//!
//! [`Signal`] is a resettable flag that threads can block on with a timeout.
//! Backend callbacks set it, polling loops wait on it, and cancellation is
//! expressed through it, so every suspension point in the audio engine is a
//! bounded wait on a `Signal`.
//!
//! [`join_bounded`] is the matching helper for threads: wait a limited time
//! for a worker to exit, then move on without it.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A resettable, waitable boolean flag.
#[derive(Debug, Default)]
pub struct Signal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    /// Creates a cleared signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter.
    pub fn set(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cond.notify_all();
    }

    /// Clears the flag.
    pub fn clear(&self) {
        *self.flag.lock() = false;
    }

    /// Returns whether the flag is currently set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.flag.lock()
    }

    /// Blocks until the flag is set or `timeout` elapses.
    ///
    /// Returns `true` if the flag was set, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock();
        while !*flag {
            if self.cond.wait_until(&mut flag, deadline).timed_out() {
                return *flag;
            }
        }
        true
    }
}

/// Joins `handle` if it finishes within `timeout`.
///
/// Returns `false` if the thread is still running; it is then left detached.
/// Joining the calling thread itself is refused.
pub fn join_bounded(handle: JoinHandle<()>, timeout: Duration) -> bool {
    if handle.thread().id() == thread::current().id() {
        return false;
    }
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    handle.join().is_ok()
}
