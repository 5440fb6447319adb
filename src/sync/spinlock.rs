//! Busy-waiting spinlock.
//!
//! Meant for very short critical sections: `lock` never parks the thread,
//! it spins with exponential backoff until the lock word is free. The
//! spinlock is not recursive. Relocking by the owner would spin forever, so
//! it traps instead; so does `unlock` by any thread other than the owner.
//!
//! Lifecycle and lock state share one atomic word, so `destroy` can only
//! win against an unlocked spinlock.
//!
//! ```text
//! Uninitialized --init--> Unlocked <--lock/unlock--> Locked
//!                            |
//!                         destroy --> Destroyed --init--> Unlocked
//! ```

use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use super::thread_token;
use crate::os::Os;
use crate::trap::{Fault, FaultSite, ObjectKind};

const KIND: ObjectKind = ObjectKind::Spinlock;

const UNINITIALIZED: u8 = 0;
const UNLOCKED: u8 = 1;
const LOCKED: u8 = 2;
const DESTROYED: u8 = 3;

/// No thread holds the lock.
const NO_OWNER: u64 = 0;

/// Caller-owned spinlock bound to an [`Os`] context.
#[derive(Debug)]
pub struct SpinlockHandle {
    os: Os,
    state: AtomicU8,
    owner: AtomicU64,
}

impl SpinlockHandle {
    /// Creates uninitialized storage bound to `os`.
    #[must_use]
    pub fn new(os: &Os) -> Self {
        Self {
            os: os.clone(),
            state: AtomicU8::new(UNINITIALIZED),
            owner: AtomicU64::new(NO_OWNER),
        }
    }

    /// Initializes the spinlock in the unlocked state.
    #[track_caller]
    pub fn init(&self) {
        self.os.ensure_running(&FaultSite::caller("SpinlockHandle::init"));
        self.owner.store(NO_OWNER, Ordering::Release);
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if matches!(current, UNLOCKED | LOCKED) {
                self.os
                    .fault("SpinlockHandle::init", Fault::AlreadyInitialized(KIND));
            }
            match self.state.compare_exchange(
                current,
                UNLOCKED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.os.census().created(KIND);
        tracing::debug!(kind = %KIND, "init");
    }

    /// Acquires the lock, spinning until it is free.
    #[track_caller]
    pub fn lock(&self) {
        let me = self.check_not_owner("SpinlockHandle::lock");
        let backoff = Backoff::new();
        loop {
            match self.state.compare_exchange_weak(
                UNLOCKED,
                LOCKED,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(LOCKED) => {
                    while self.state.load(Ordering::Relaxed) == LOCKED {
                        backoff.snooze();
                    }
                }
                Err(UNLOCKED) => {}
                Err(other) => self.not_live(other, "SpinlockHandle::lock"),
            }
        }
        self.owner.store(me, Ordering::Release);
    }

    /// Acquires the lock if it is free. Never spins.
    #[track_caller]
    pub fn try_lock(&self) -> bool {
        let me = self.check_not_owner("SpinlockHandle::try_lock");
        match self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => {
                self.owner.store(me, Ordering::Release);
                true
            }
            Err(LOCKED) => false,
            Err(other) => self.not_live(other, "SpinlockHandle::try_lock"),
        }
    }

    /// Releases the lock. Traps unless the caller holds it.
    #[track_caller]
    pub fn unlock(&self) {
        match self.state.load(Ordering::Acquire) {
            LOCKED if self.owner.load(Ordering::Acquire) == thread_token() => {}
            LOCKED | UNLOCKED => {
                self.os.fault("SpinlockHandle::unlock", Fault::NotOwner(KIND));
            }
            other => self.not_live(other, "SpinlockHandle::unlock"),
        }
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        self.state.store(UNLOCKED, Ordering::Release);
    }

    /// Returns true if some thread holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Acquire) == LOCKED
    }

    /// Releases the spinlock. Traps if it is not live or is held.
    #[track_caller]
    pub fn destroy(&self) {
        match self.state.compare_exchange(
            UNLOCKED,
            DESTROYED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(LOCKED) => self.os.fault("SpinlockHandle::destroy", Fault::Busy(KIND)),
            Err(other) => self.not_live(other, "SpinlockHandle::destroy"),
        }
        self.os.census().destroyed(KIND);
        tracing::debug!(kind = %KIND, "destroy");
    }

    /// Returns the caller's token; traps if the spinlock is not live or the
    /// caller already holds it.
    #[track_caller]
    fn check_not_owner(&self, function: &'static str) -> u64 {
        let state = self.state.load(Ordering::Acquire);
        if !matches!(state, UNLOCKED | LOCKED) {
            self.not_live(state, function);
        }
        let me = thread_token();
        if self.owner.load(Ordering::Acquire) == me {
            self.os.fault(function, Fault::WouldDeadlock(KIND));
        }
        me
    }

    #[track_caller]
    fn not_live(&self, state: u8, function: &'static str) -> ! {
        if state == DESTROYED {
            self.os.fault(function, Fault::Destroyed(KIND));
        }
        self.os.fault(function, Fault::Uninitialized(KIND))
    }
}
