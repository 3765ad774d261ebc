//! At-most-once cancellation shared by every worker of one run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Broadcast stop flag tagged with the generation of the run it belongs to.
///
/// Cloning shares the same flag. Firing is idempotent: only the first
/// `trigger` call reports `true`, every later one is a no-op.
#[derive(Clone, Debug)]
pub struct CancellationSignal {
    inner: Arc<SignalInner>,
}

#[derive(Debug)]
struct SignalInner {
    generation: u64,
    fired: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl CancellationSignal {
    pub fn new(generation: u64) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                generation,
                fired: AtomicBool::new(false),
                lock: Mutex::new(()),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Fires the signal. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Taking the lock orders the store before any waiter re-checks.
        let _guard = self.inner.lock.lock();
        self.inner.wake.notify_all();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Blocks the calling thread for up to `timeout`, returning early once
    /// the signal fires. Returns whether the signal has fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_triggered() || timeout.is_zero() {
            return self.is_triggered();
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_triggered() {
            if self.inner.wake.wait_until(&mut guard, deadline).timed_out() {
                return self.is_triggered();
            }
        }
        true
    }
}
