//! Caller-owned synchronization primitives with fail-fast semantics.
//!
//! # Primitives
//!
//! - [`MutexHandle`]: recursive mutex; the owner may re-enter
//! - [`SemaphoreHandle`]: counting semaphore with blocking wait
//! - [`SpinlockHandle`]: non-recursive busy-waiting lock
//!
//! # Lifecycle
//!
//! Every handle is created uninitialized with `new(&os)` and becomes usable
//! only after `init`. `destroy` returns it to a dead state; a destroyed
//! handle may be initialized again. Misuse never returns an error: it
//! traps through the handle's [`Os`](crate::Os) context with the caller's
//! source location.
//!
//! Handles are plain values. Share them between threads with `Arc` or
//! scoped borrows.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

mod mutex;
mod semaphore;
mod spinlock;

pub use mutex::MutexHandle;
pub use semaphore::{SEM_VALUE_MAX, SemaphoreHandle};
pub use spinlock::SpinlockHandle;

/// Next token handed to a thread; zero is reserved for "no owner".
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Returns a non-zero id unique to the calling thread.
pub(crate) fn thread_token() -> u64 {
    TOKEN.with(|token| {
        let mut value = token.get();
        if value == 0 {
            value = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
            token.set(value);
        }
        value
    })
}
