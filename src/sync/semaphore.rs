//! Counting semaphore with fail-fast misuse detection.
//!
//! The semaphore carries a non-negative count. [`wait`](SemaphoreHandle::wait)
//! takes one unit, blocking while the count is zero;
//! [`release`](SemaphoreHandle::release) returns one unit and wakes at most
//! one blocked waiter. No FIFO order among waiters is promised.
//!
//! `wait` has no timeout. Bounded waiting lives in separate entry points
//! ([`try_wait`](SemaphoreHandle::try_wait),
//! [`wait_deadline`](SemaphoreHandle::wait_deadline),
//! [`wait_timeout`](SemaphoreHandle::wait_timeout)) so the unbounded contract
//! stays untouched.
//!
//! # Example
//!
//! ```ignore
//! use vanos::{Os, SemaphoreHandle};
//!
//! let os = Os::init();
//! let suspend = SemaphoreHandle::new(&os);
//! suspend.init(0);
//! // worker: suspend.release();
//! suspend.wait();
//! suspend.destroy();
//! ```

use parking_lot::{Condvar, Mutex as ParkingMutex};
use std::time::{Duration, Instant};

use crate::os::Os;
use crate::trap::{Fault, FaultSite, ObjectKind};

const KIND: ObjectKind = ObjectKind::Semaphore;

/// Largest count a semaphore may hold.
pub const SEM_VALUE_MAX: u32 = i32::MAX.unsigned_abs();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Ready,
    Destroyed,
}

#[derive(Debug)]
struct SemaphoreState {
    phase: Phase,
    /// Available units.
    count: u32,
    /// Threads blocked in a wait.
    waiters: usize,
}

/// Caller-owned counting semaphore bound to an [`Os`] context.
#[derive(Debug)]
pub struct SemaphoreHandle {
    os: Os,
    state: ParkingMutex<SemaphoreState>,
    available: Condvar,
}

impl SemaphoreHandle {
    /// Creates uninitialized storage bound to `os`.
    #[must_use]
    pub fn new(os: &Os) -> Self {
        Self {
            os: os.clone(),
            state: ParkingMutex::new(SemaphoreState {
                phase: Phase::Uninitialized,
                count: 0,
                waiters: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Initializes the semaphore with `initial_count` units.
    ///
    /// Traps if the count exceeds [`SEM_VALUE_MAX`] or the semaphore is
    /// already live.
    #[track_caller]
    pub fn init(&self, initial_count: u32) {
        self.os.ensure_running(&FaultSite::caller("SemaphoreHandle::init"));
        if initial_count > SEM_VALUE_MAX {
            self.os.fault(
                "SemaphoreHandle::init",
                Fault::InvalidArgument(format!(
                    "initial count {initial_count} exceeds {SEM_VALUE_MAX}"
                )),
            );
        }
        let mut state = self.state.lock();
        if state.phase == Phase::Ready {
            self.os
                .fault("SemaphoreHandle::init", Fault::AlreadyInitialized(KIND));
        }
        state.phase = Phase::Ready;
        state.count = initial_count;
        drop(state);
        self.os.census().created(KIND);
        tracing::debug!(kind = %KIND, initial_count, "init");
    }

    /// Takes one unit, blocking until one is available.
    #[track_caller]
    pub fn wait(&self) {
        let mut state = self.state.lock();
        self.check_ready(state.phase, "SemaphoreHandle::wait");
        while state.count == 0 {
            state.waiters += 1;
            self.available.wait(&mut state);
            state.waiters -= 1;
        }
        state.count -= 1;
        drop(state);
        tracing::trace!(kind = %KIND, "wait");
    }

    /// Takes one unit if available, without blocking.
    #[track_caller]
    pub fn try_wait(&self) -> bool {
        let mut state = self.state.lock();
        self.check_ready(state.phase, "SemaphoreHandle::try_wait");
        if state.count == 0 {
            return false;
        }
        state.count -= 1;
        true
    }

    /// Takes one unit, blocking no later than `deadline`.
    ///
    /// Returns `false` if the deadline passed without a unit.
    #[track_caller]
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        self.check_ready(state.phase, "SemaphoreHandle::wait_deadline");
        while state.count == 0 {
            state.waiters += 1;
            let timed_out = self.available.wait_until(&mut state, deadline).timed_out();
            state.waiters -= 1;
            if timed_out && state.count == 0 {
                return false;
            }
        }
        state.count -= 1;
        // A release may have targeted this waiter while it was timing out;
        // hand the wake-up on if units remain.
        let pass_on = state.count > 0 && state.waiters > 0;
        drop(state);
        if pass_on {
            self.available.notify_one();
        }
        true
    }

    /// Takes one unit, blocking for at most `timeout`.
    #[track_caller]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_deadline(deadline),
            None => {
                self.wait();
                true
            }
        }
    }

    /// Returns one unit and wakes one waiter, if any.
    ///
    /// Traps if the count would exceed [`SEM_VALUE_MAX`].
    #[track_caller]
    pub fn release(&self) {
        let mut state = self.state.lock();
        self.check_ready(state.phase, "SemaphoreHandle::release");
        if state.count == SEM_VALUE_MAX {
            self.os
                .fault("SemaphoreHandle::release", Fault::Overflow(KIND));
        }
        state.count += 1;
        let wake = state.waiters > 0;
        drop(state);
        if wake {
            self.available.notify_one();
        }
        tracing::trace!(kind = %KIND, "release");
    }

    /// Returns the number of available units.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.state.lock().count
    }

    /// Releases the semaphore. Traps if it is not live or has waiters.
    #[track_caller]
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        self.check_ready(state.phase, "SemaphoreHandle::destroy");
        if state.waiters > 0 {
            self.os.fault("SemaphoreHandle::destroy", Fault::Busy(KIND));
        }
        state.phase = Phase::Destroyed;
        state.count = 0;
        drop(state);
        self.os.census().destroyed(KIND);
        tracing::debug!(kind = %KIND, "destroy");
    }

    #[track_caller]
    fn check_ready(&self, phase: Phase, function: &'static str) {
        match phase {
            Phase::Ready => {}
            Phase::Uninitialized => self.os.fault(function, Fault::Uninitialized(KIND)),
            Phase::Destroyed => self.os.fault(function, Fault::Destroyed(KIND)),
        }
    }
}
