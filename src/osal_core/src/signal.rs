//! Coalescing wake signal
use std::{
    sync::{Condvar, Mutex, MutexGuard},
    time::Instant,
};

/// A binary wake-up event shared between a waiting thread and any number of
/// raisers.
///
/// Raising a signal that is already pending has no effect, so wake-ups that
/// arrive while the waiter is busy are collapsed into one.
#[derive(Debug, Default)]
pub struct WakeSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        // The protected state is a plain flag, so a poisoned lock is still
        // usable
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark the signal as pending and wake the waiter.
    pub fn raise(&self) {
        let mut pending = self.lock();
        *pending = true;
        self.cond.notify_all();
    }

    /// Check and clear the pending flag without blocking.
    pub fn poll(&self) -> bool {
        core::mem::replace(&mut *self.lock(), false)
    }

    /// Block until the signal is raised, and clear it.
    pub fn wait(&self) {
        let mut pending = self.lock();
        while !*pending {
            pending = self.cond.wait(pending).unwrap_or_else(|e| e.into_inner());
        }
        *pending = false;
    }

    /// Block until the signal is raised or `deadline` passes.
    ///
    /// Returns `true` if the signal was raised (and clears it). A `None`
    /// deadline waits forever.
    pub fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let Some(deadline) = deadline else {
            self.wait();
            return true;
        };

        let mut pending = self.lock();
        while !*pending {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pending = self
                .cond
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        *pending = false;
        true
    }
}
