//! Per-call cancellation flag the engine threads wait on.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct Signal {
    cancelled: Mutex<bool>,
    changed: Condvar,
}

impl Signal {
    pub fn cancel(&self) {
        let mut cancelled = self.cancelled.lock();
        *cancelled = true;
        self.changed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Sleeps for at most `timeout`, waking early on cancellation.
    ///
    /// Returns whether the signal has been cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut cancelled = self.cancelled.lock();
        if !*cancelled {
            self.changed.wait_for(&mut cancelled, timeout);
        }
        *cancelled
    }
}
