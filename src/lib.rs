//! Vanos: a fail-fast OS shim.
//!
//! Thin wrappers over native synchronization and threading that never
//! return error codes for misuse. Every invalid use traps: the fault site
//! is printed as
//!
//! ```text
//! *** core dump at "<file>", "<function>", <line>
//! ```
//!
//! and the process aborts with a core dump.
//!
//! # Components
//!
//! - [`Os`]: explicit bootstrap context; installs the `SIGINT` trap and owns
//!   the thread registry
//! - [`MutexHandle`]: recursive mutex
//! - [`SemaphoreHandle`]: counting semaphore
//! - [`SpinlockHandle`]: busy-waiting lock
//! - [`ThreadHandle`]: named thread with a [`ThreadPriority`] tier
//! - [`trap!`] / [`trap_if!`]: raise a fault from caller code
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vanos::{os_init, SemaphoreHandle, ThreadHandle, ThreadPriority};
//!
//! let os = os_init();
//! let suspend = Arc::new(SemaphoreHandle::new(&os));
//! suspend.init(0);
//!
//! let worker = ThreadHandle::new(&os);
//! let done = Arc::clone(&suspend);
//! os.thread_start(&worker, "bat", ThreadPriority::Foreground, move || done.release());
//! suspend.wait();
//!
//! worker.destroy();
//! suspend.destroy();
//! os.exit();
//! ```
//!
//! # Testing
//!
//! Build the context with [`PanicOnFault`] (or use [`Os::for_testing`])
//! and wrap the call in [`catch_fault`] to observe a trap without aborting.

pub mod config;
pub mod os;
pub mod signal;
pub mod sync;
pub mod thread;
pub mod trap;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{ConfigError, OsConfig};
pub use os::{Os, OsBuilder, OsStatistics, os_init};
pub use signal::SignalKind;
pub use sync::{MutexHandle, SEM_VALUE_MAX, SemaphoreHandle, SpinlockHandle};
pub use thread::{ThreadHandle, ThreadInfo, ThreadPriority};
pub use trap::{
    AbortOnFault, Fault, FaultHandler, FaultReport, FaultSite, ObjectKind, PanicOnFault,
    catch_fault,
};
