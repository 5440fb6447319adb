#![allow(unsafe_code)]
//! Named OS threads with a priority tier.
//!
//! A [`ThreadHandle`] is created unstarted with [`ThreadHandle::new`] and
//! started once with [`ThreadHandle::start`] (or
//! [`Os::thread_start`](crate::Os::thread_start)). Starting takes a slot in
//! the context's thread registry; [`ThreadHandle::destroy`] joins the
//! thread and gives the slot back.
//!
//! Priorities are hints unless
//! [`OsConfig::realtime_scheduling`](crate::OsConfig::realtime_scheduling)
//! is set. In that mode the new thread switches itself to `SCHED_RR` at the
//! tier's priority before running its entry, and traps if the kernel
//! refuses (usually for lack of `CAP_SYS_NICE`). This module uses unsafe
//! code for that `pthread_setschedparam` call only.

pub(crate) mod registry;

use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::thread::{self, JoinHandle};

use crate::config::THREAD_NAME_LEN;
use crate::os::Os;
use crate::trap::{Fault, FaultSite, ObjectKind};

const KIND: ObjectKind = ObjectKind::Thread;

/// Scheduling tier of a thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ThreadPriority {
    /// Lowest tier; the normal choice.
    #[default]
    Default,
    /// Interactive work.
    Foreground,
    /// Deferred work that still beats the default tier.
    Background,
    /// Latency-sensitive work.
    SoftRealtime,
    /// Deadline-bound work.
    HardRealtime,
}

impl ThreadPriority {
    /// Numeric priority passed to the scheduler.
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::HardRealtime => 99,
            Self::SoftRealtime => 50,
            Self::Background => 40,
            Self::Foreground => 35,
            Self::Default => 5,
        }
    }

    /// True for the two realtime tiers.
    #[must_use]
    pub const fn is_realtime(self) -> bool {
        matches!(self, Self::HardRealtime | Self::SoftRealtime)
    }
}

impl fmt::Display for ThreadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HardRealtime => "hard-realtime",
            Self::SoftRealtime => "soft-realtime",
            Self::Background => "background",
            Self::Foreground => "foreground",
            Self::Default => "default",
        };
        write!(f, "{name}({})", self.value())
    }
}

/// A registered thread, as listed by [`Os::threads`](crate::Os::threads).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Registry slot.
    pub slot: usize,
    /// Thread name after truncation.
    pub name: String,
    /// Requested tier.
    pub priority: ThreadPriority,
}

#[derive(Debug)]
enum ThreadState {
    Created,
    Running {
        slot: usize,
        name: String,
        priority: ThreadPriority,
        join: JoinHandle<()>,
    },
    Joined {
        name: String,
        priority: ThreadPriority,
    },
}

/// Caller-owned handle to one OS thread.
#[derive(Debug)]
pub struct ThreadHandle {
    os: Os,
    state: Mutex<ThreadState>,
}

impl ThreadHandle {
    /// Creates an unstarted handle bound to `os`.
    #[must_use]
    pub fn new(os: &Os) -> Self {
        Self {
            os: os.clone(),
            state: Mutex::new(ThreadState::Created),
        }
    }

    /// Spawns a thread named `name` that runs `entry`.
    ///
    /// The name is cut to `THREAD_NAME_LEN - 1` bytes. Traps if the handle
    /// was already started, if the name contains a NUL byte, if the registry
    /// is full, or if the OS refuses the thread.
    #[track_caller]
    pub fn start<F>(&self, name: &str, priority: ThreadPriority, entry: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let site = FaultSite::caller("ThreadHandle::start");
        let mut state = self.state.lock();
        if !matches!(*state, ThreadState::Created) {
            self.os.trap(&site, Fault::AlreadyInitialized(KIND));
        }

        self.os.ensure_running(&site);
        if name.contains('\0') {
            self.os.trap(
                &site,
                Fault::InvalidArgument(format!("thread name {name:?} contains a NUL byte")),
            );
        }

        let name = truncate_name(name);
        let registry = self.os.registry();
        let Some(slot) = registry.allocate(name, priority) else {
            self.os.trap(
                &site,
                Fault::RegistryFull {
                    limit: registry.limit(),
                },
            );
        };

        let mut builder = thread::Builder::new().name(name.to_owned());
        if let Some(size) = self.os.config().thread_stack_size {
            builder = builder.stack_size(size);
        }

        let realtime = self.os.config().realtime_scheduling;
        if priority.is_realtime() && !realtime {
            tracing::debug!(%priority, "realtime tier recorded as a hint only");
        }
        let os = self.os.clone();
        let spawned = builder.spawn(move || {
            if realtime {
                if let Err(err) = apply_round_robin(priority) {
                    os.trap(&site, Fault::Scheduling(err));
                }
            }
            entry();
        });

        let join = match spawned {
            Ok(join) => join,
            Err(err) => {
                registry.release(slot);
                self.os.trap(&site, Fault::ThreadSpawn(err));
            }
        };

        tracing::debug!(slot, name, %priority, realtime, "thread started");
        *state = ThreadState::Running {
            slot,
            name: name.to_owned(),
            priority,
            join,
        };
    }

    /// Waits for the thread to finish and frees its registry slot.
    ///
    /// Traps if the handle was never started, was already destroyed, or if
    /// the thread's entry panicked.
    #[track_caller]
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        let (slot, name, priority, join) =
            match std::mem::replace(&mut *state, ThreadState::Created) {
                ThreadState::Running {
                    slot,
                    name,
                    priority,
                    join,
                } => (slot, name, priority, join),
                ThreadState::Created => {
                    self.os
                        .fault("ThreadHandle::destroy", Fault::Uninitialized(KIND));
                }
                joined @ ThreadState::Joined { .. } => {
                    *state = joined;
                    self.os
                        .fault("ThreadHandle::destroy", Fault::Destroyed(KIND));
                }
            };

        let outcome = join.join();
        self.os.registry().release(slot);
        *state = ThreadState::Joined {
            name: name.clone(),
            priority,
        };
        drop(state);

        if outcome.is_err() {
            self.os
                .fault("ThreadHandle::destroy", Fault::ThreadPanicked(name));
        }
        tracing::debug!(slot, name = %name, "thread joined");
    }

    /// The thread's name, once started.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        match &*self.state.lock() {
            ThreadState::Created => None,
            ThreadState::Running { name, .. } | ThreadState::Joined { name, .. } => {
                Some(name.clone())
            }
        }
    }

    /// The requested tier, once started.
    #[must_use]
    pub fn priority(&self) -> Option<ThreadPriority> {
        match &*self.state.lock() {
            ThreadState::Created => None,
            ThreadState::Running { priority, .. } | ThreadState::Joined { priority, .. } => {
                Some(*priority)
            }
        }
    }

    /// True once the entry function has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &*self.state.lock() {
            ThreadState::Created => false,
            ThreadState::Running { join, .. } => join.is_finished(),
            ThreadState::Joined { .. } => true,
        }
    }
}

/// Cuts `name` to at most `THREAD_NAME_LEN - 1` bytes on a char boundary.
fn truncate_name(name: &str) -> &str {
    let max = THREAD_NAME_LEN - 1;
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Switches the calling thread to `SCHED_RR` at `priority`.
fn apply_round_robin(priority: ThreadPriority) -> io::Result<()> {
    // SAFETY: sched_param is plain data; all-zero is a valid value.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = priority.value();
    // SAFETY: pthread_self() is always a valid handle for the caller and
    // `param` outlives the call.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    tracing::trace!(priority = priority.value(), "SCHED_RR applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OsConfig;
    use crate::trap::{PanicOnFault, catch_fault};
    use crate::SemaphoreHandle;
    use std::sync::Arc;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn priority_values() {
        init_test("priority_values");
        let values: Vec<_> = [
            ThreadPriority::HardRealtime,
            ThreadPriority::SoftRealtime,
            ThreadPriority::Background,
            ThreadPriority::Foreground,
            ThreadPriority::Default,
        ]
        .iter()
        .map(|p| p.value())
        .collect();
        crate::assert_with_log!(values == [99, 50, 40, 35, 5], "values", [99, 50, 40, 35, 5], values);
        let realtime: Vec<_> = [ThreadPriority::HardRealtime, ThreadPriority::Background]
            .iter()
            .map(|p| p.is_realtime())
            .collect();
        crate::assert_with_log!(realtime == [true, false], "realtime tiers", [true, false], realtime);
        crate::test_complete!("priority_values");
    }

    #[test]
    fn long_names_are_truncated_on_char_boundary() {
        init_test("long_names_are_truncated_on_char_boundary");
        let short = truncate_name("bat");
        crate::assert_with_log!(short == "bat", "short kept", "bat", short);
        let long = truncate_name("a-very-long-thread-name");
        crate::assert_with_log!(long == "a-very-long-thr", "cut to 15", "a-very-long-thr", long);
        // 'é' is two bytes; byte 15 falls inside the eighth one.
        let accented = truncate_name("éééééééééé");
        crate::assert_with_log!(accented.len() == 14, "char boundary", 14, accented.len());
        crate::test_complete!("long_names_are_truncated_on_char_boundary");
    }

    #[test]
    fn started_thread_releases_semaphore() {
        init_test("started_thread_releases_semaphore");
        let os = Os::for_testing();
        let sem = Arc::new(SemaphoreHandle::new(&os));
        sem.init(0);

        let worker = ThreadHandle::new(&os);
        let released = Arc::clone(&sem);
        os.thread_start(&worker, "bat", ThreadPriority::Foreground, move || {
            released.release();
        });
        sem.wait();

        let name = worker.name();
        crate::assert_with_log!(name.as_deref() == Some("bat"), "name", Some("bat"), name);
        let threads = os.threads();
        crate::assert_with_log!(threads.len() == 1, "registered", 1, threads.len());
        let current = worker.priority();
        crate::assert_with_log!(
            current == Some(ThreadPriority::Foreground),
            "priority",
            Some(ThreadPriority::Foreground),
            current
        );

        worker.destroy();
        crate::assert_with_log!(worker.is_finished(), "finished", true, worker.is_finished());
        sem.destroy();
        let stats = os.statistics();
        crate::assert_with_log!(stats.is_quiescent(), "quiescent", true, stats);
        os.exit();
        crate::test_complete!("started_thread_releases_semaphore");
    }

    #[test]
    fn spawned_thread_carries_its_name() {
        init_test("spawned_thread_carries_its_name");
        let os = Os::for_testing();
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = ThreadHandle::new(&os);
        worker.start("named-worker", ThreadPriority::Default, move || {
            let name = std::thread::current().name().map(str::to_owned);
            let _ = tx.send(name);
        });
        let seen = rx.recv().expect("name");
        crate::assert_with_log!(
            seen.as_deref() == Some("named-worker"),
            "thread name",
            Some("named-worker"),
            seen
        );
        worker.destroy();
        crate::test_complete!("spawned_thread_carries_its_name");
    }

    #[test]
    fn start_twice_traps() {
        init_test("start_twice_traps");
        let os = Os::for_testing();
        let worker = ThreadHandle::new(&os);
        worker.start("once", ThreadPriority::Default, || {});
        let report = catch_fault(|| worker.start("twice", ThreadPriority::Default, || {})).unwrap_err();
        let twice = report.message.contains("thread initialized twice");
        crate::assert_with_log!(twice, "second start", true, &report.message);
        crate::assert_with_log!(
            report.site.function() == "ThreadHandle::start",
            "function",
            "ThreadHandle::start",
            report.site.function()
        );
        worker.destroy();
        crate::test_complete!("start_twice_traps");
    }

    #[test]
    fn registry_limit_traps() {
        init_test("registry_limit_traps");
        let os = Os::builder()
            .catch_interrupt(false)
            .fault_handler(PanicOnFault)
            .config(OsConfig::default().thread_limit(1))
            .build();
        let first = ThreadHandle::new(&os);
        first.start("first", ThreadPriority::Default, || {});
        let second = ThreadHandle::new(&os);
        let report =
            catch_fault(|| second.start("second", ThreadPriority::Default, || {})).unwrap_err();
        let full = report.message.contains("registry full (1 slots)");
        crate::assert_with_log!(full, "registry full", true, &report.message);

        first.destroy();
        second.start("second", ThreadPriority::Default, || {});
        second.destroy();
        os.exit();
        crate::test_complete!("registry_limit_traps");
    }

    #[test]
    fn destroy_reports_panicking_entry() {
        init_test("destroy_reports_panicking_entry");
        let os = Os::for_testing();
        let worker = ThreadHandle::new(&os);
        worker.start("boom", ThreadPriority::Default, || panic!("entry failed"));
        let report = catch_fault(|| worker.destroy()).unwrap_err();
        let panicked = report.message.contains("thread `boom` panicked");
        crate::assert_with_log!(panicked, "panic surfaced", true, &report.message);
        let stats = os.statistics();
        crate::assert_with_log!(stats.thread_count == 0, "slot freed", 0, stats.thread_count);
        crate::test_complete!("destroy_reports_panicking_entry");
    }

    #[test]
    fn destroy_misuse_traps() {
        init_test("destroy_misuse_traps");
        let os = Os::for_testing();
        let worker = ThreadHandle::new(&os);
        let report = catch_fault(|| worker.destroy()).unwrap_err();
        let unstarted = report.message.contains("thread used before init");
        crate::assert_with_log!(unstarted, "unstarted", true, &report.message);

        worker.start("short", ThreadPriority::Default, || {});
        worker.destroy();
        let report = catch_fault(|| worker.destroy()).unwrap_err();
        let twice = report.message.contains("thread used after destroy");
        crate::assert_with_log!(twice, "double destroy", true, &report.message);
        crate::test_complete!("destroy_misuse_traps");
    }

    #[test]
    fn nul_in_name_traps_without_taking_a_slot() {
        init_test("nul_in_name_traps_without_taking_a_slot");
        let os = Os::for_testing();
        let worker = ThreadHandle::new(&os);
        let expected_line = line!() + 1;
        let report = catch_fault(|| worker.start("a\0b", ThreadPriority::Default, || {})).unwrap_err();
        let invalid = report.message.contains("invalid argument");
        crate::assert_with_log!(invalid, "invalid name", true, &report.message);
        crate::assert_with_log!(
            report.site.line() == expected_line,
            "reported at the caller",
            expected_line,
            report.site.line()
        );
        let stats = os.statistics();
        crate::assert_with_log!(stats.thread_count == 0, "no slot held", 0, stats.thread_count);

        crate::test_section!("handle still usable");
        worker.start("ab", ThreadPriority::Default, || {});
        worker.destroy();
        os.exit();
        crate::test_complete!("nul_in_name_traps_without_taking_a_slot");
    }
}
