//! Recursive mutex ("critical section") with fail-fast misuse detection.
//!
//! # States
//!
//! ```text
//! Uninitialized --init--> Idle <--enter/leave--> Held { owner, depth }
//!                          |
//!                       destroy --> Destroyed --init--> Idle
//! ```
//!
//! Any operation that does not fit the current state traps through the
//! handle's [`Os`] context: `enter` before `init`, `leave` by a thread that
//! does not hold the mutex (including one `leave` too many), `destroy`
//! while held or while other threads are waiting.
//!
//! # Example
//!
//! ```ignore
//! use vanos::{MutexHandle, Os};
//!
//! let os = Os::init();
//! let cs = MutexHandle::new(&os);
//! cs.init();
//! cs.enter();
//! cs.enter(); // same thread re-enters
//! cs.leave();
//! cs.leave();
//! cs.destroy();
//! ```

use parking_lot::{Condvar, Mutex as ParkingMutex};
use std::thread::{self, ThreadId};

use crate::os::Os;
use crate::trap::{Fault, FaultSite, ObjectKind};

const KIND: ObjectKind = ObjectKind::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Uninitialized,
    Idle,
    Held { owner: ThreadId, depth: u32 },
    Destroyed,
}

#[derive(Debug)]
struct MutexState {
    lock: LockState,
    /// Threads blocked in `enter`.
    waiters: usize,
}

/// Caller-owned recursive mutex bound to an [`Os`] context.
#[derive(Debug)]
pub struct MutexHandle {
    os: Os,
    state: ParkingMutex<MutexState>,
    released: Condvar,
}

impl MutexHandle {
    /// Creates uninitialized storage bound to `os`.
    #[must_use]
    pub fn new(os: &Os) -> Self {
        Self {
            os: os.clone(),
            state: ParkingMutex::new(MutexState {
                lock: LockState::Uninitialized,
                waiters: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Initializes the mutex. Traps if it is already live.
    #[track_caller]
    pub fn init(&self) {
        self.os.ensure_running(&FaultSite::caller("MutexHandle::init"));
        let mut state = self.state.lock();
        match state.lock {
            LockState::Uninitialized | LockState::Destroyed => {
                state.lock = LockState::Idle;
            }
            LockState::Idle | LockState::Held { .. } => {
                self.os.fault("MutexHandle::init", Fault::AlreadyInitialized(KIND));
            }
        }
        drop(state);
        self.os.census().created(KIND);
        tracing::debug!(kind = %KIND, "init");
    }

    /// Enters the critical section, blocking until it is free.
    ///
    /// The owning thread may enter again; each `enter` needs a matching
    /// [`leave`](Self::leave).
    #[track_caller]
    pub fn enter(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.lock {
                LockState::Idle => {
                    state.lock = LockState::Held {
                        owner: me,
                        depth: 1,
                    };
                    break;
                }
                LockState::Held { owner, depth } if owner == me => {
                    let Some(depth) = depth.checked_add(1) else {
                        self.os.fault("MutexHandle::enter", Fault::Overflow(KIND));
                    };
                    state.lock = LockState::Held { owner, depth };
                    break;
                }
                LockState::Held { .. } => {
                    state.waiters += 1;
                    self.released.wait(&mut state);
                    state.waiters -= 1;
                }
                LockState::Uninitialized => {
                    self.os.fault("MutexHandle::enter", Fault::Uninitialized(KIND));
                }
                LockState::Destroyed => {
                    self.os.fault("MutexHandle::enter", Fault::Destroyed(KIND));
                }
            }
        }
        drop(state);
        tracing::trace!(kind = %KIND, "enter");
    }

    /// Enters the critical section if that does not require blocking.
    ///
    /// Returns `false` if another thread holds it.
    #[track_caller]
    pub fn try_enter(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.lock {
            LockState::Idle => {
                state.lock = LockState::Held {
                    owner: me,
                    depth: 1,
                };
                true
            }
            LockState::Held { owner, depth } if owner == me => {
                let Some(depth) = depth.checked_add(1) else {
                    self.os.fault("MutexHandle::try_enter", Fault::Overflow(KIND));
                };
                state.lock = LockState::Held { owner, depth };
                true
            }
            LockState::Held { .. } => false,
            LockState::Uninitialized => {
                self.os
                    .fault("MutexHandle::try_enter", Fault::Uninitialized(KIND));
            }
            LockState::Destroyed => {
                self.os.fault("MutexHandle::try_enter", Fault::Destroyed(KIND));
            }
        }
    }

    /// Leaves one level of the critical section.
    ///
    /// Traps if the calling thread does not hold the mutex.
    #[track_caller]
    pub fn leave(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let wake = match state.lock {
            LockState::Held { owner, depth } if owner == me => {
                if depth == 1 {
                    state.lock = LockState::Idle;
                    state.waiters > 0
                } else {
                    state.lock = LockState::Held {
                        owner,
                        depth: depth - 1,
                    };
                    false
                }
            }
            LockState::Held { .. } | LockState::Idle => {
                self.os.fault("MutexHandle::leave", Fault::NotOwner(KIND));
            }
            LockState::Uninitialized => {
                self.os.fault("MutexHandle::leave", Fault::Uninitialized(KIND));
            }
            LockState::Destroyed => {
                self.os.fault("MutexHandle::leave", Fault::Destroyed(KIND));
            }
        };
        drop(state);
        if wake {
            self.released.notify_one();
        }
        tracing::trace!(kind = %KIND, "leave");
    }

    /// Returns true if some thread holds the mutex.
    #[must_use]
    pub fn is_held(&self) -> bool {
        matches!(self.state.lock().lock, LockState::Held { .. })
    }

    /// Releases the mutex. Traps if it is held, waited on, or not live.
    #[track_caller]
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        match state.lock {
            LockState::Idle if state.waiters == 0 => {
                state.lock = LockState::Destroyed;
            }
            LockState::Idle | LockState::Held { .. } => {
                self.os.fault("MutexHandle::destroy", Fault::Busy(KIND));
            }
            LockState::Uninitialized => {
                self.os
                    .fault("MutexHandle::destroy", Fault::Uninitialized(KIND));
            }
            LockState::Destroyed => {
                self.os.fault("MutexHandle::destroy", Fault::Destroyed(KIND));
            }
        }
        drop(state);
        self.os.census().destroyed(KIND);
        tracing::debug!(kind = %KIND, "destroy");
    }
}
