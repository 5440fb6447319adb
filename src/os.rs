//! Process bootstrap and the explicit OS context.
//!
//! [`Os`] replaces the process-wide state of a classic OS shim with an
//! explicit object. It is created once at process start ([`os_init`] or
//! [`Os::init`]), every handle references it, and it carries:
//!
//! - the [`FaultHandler`] every trap is routed to
//! - the [`OsConfig`] fixed at bootstrap
//! - a census of live mutexes, semaphores and spinlocks
//! - the thread registry
//!
//! Bootstrapping also installs the interrupt trap: after [`os_init`],
//! `SIGINT` aborts the process with a core dump instead of a graceful exit.
//! Signal dispositions are process-global, so only one context at a time may
//! own the interrupt trap; a second such bootstrap traps.
//!
//! # Example
//!
//! ```ignore
//! use vanos::{os_init, SemaphoreHandle};
//!
//! let os = os_init();
//! let suspend = SemaphoreHandle::new(&os);
//! suspend.init(0);
//! // ...
//! suspend.destroy();
//! os.exit();
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::OsConfig;
use crate::signal;
use crate::thread::registry::ThreadRegistry;
use crate::thread::{ThreadHandle, ThreadInfo, ThreadPriority};
use crate::trap::{AbortOnFault, Fault, FaultHandler, FaultSite, ObjectKind, PanicOnFault};

/// Set while a context owns the interrupt trap.
static BOOTSTRAPPED: AtomicBool = AtomicBool::new(false);

/// Live-object counts of a context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OsStatistics {
    /// Initialized, not yet destroyed mutexes.
    pub mutex_count: usize,
    /// Initialized, not yet destroyed semaphores.
    pub semaphore_count: usize,
    /// Initialized, not yet destroyed spinlocks.
    pub spinlock_count: usize,
    /// Started, not yet destroyed threads.
    pub thread_count: usize,
}

impl OsStatistics {
    /// Returns true if no object is live.
    #[must_use]
    pub const fn is_quiescent(&self) -> bool {
        self.mutex_count == 0
            && self.semaphore_count == 0
            && self.spinlock_count == 0
            && self.thread_count == 0
    }
}

impl fmt::Display for OsStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mutexes={} semaphores={} spinlocks={} threads={}",
            self.mutex_count, self.semaphore_count, self.spinlock_count, self.thread_count
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct Census {
    mutexes: AtomicUsize,
    semaphores: AtomicUsize,
    spinlocks: AtomicUsize,
}

impl Census {
    fn counter(&self, kind: ObjectKind) -> Option<&AtomicUsize> {
        match kind {
            ObjectKind::Mutex => Some(&self.mutexes),
            ObjectKind::Semaphore => Some(&self.semaphores),
            ObjectKind::Spinlock => Some(&self.spinlocks),
            ObjectKind::Thread | ObjectKind::Os => None,
        }
    }

    pub(crate) fn created(&self, kind: ObjectKind) {
        if let Some(counter) = self.counter(kind) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn destroyed(&self, kind: ObjectKind) {
        if let Some(counter) = self.counter(kind) {
            counter.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

struct OsInner {
    config: OsConfig,
    handler: Box<dyn FaultHandler>,
    census: Census,
    threads: ThreadRegistry,
    owns_interrupt_trap: bool,
    exited: AtomicBool,
}

/// The explicit bootstrap context every handle references.
///
/// Cloning is cheap and yields another reference to the same context.
#[derive(Clone)]
pub struct Os {
    inner: Arc<OsInner>,
}

impl fmt::Debug for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Os")
            .field("config", &self.inner.config)
            .field("handler", &self.inner.handler)
            .field("owns_interrupt_trap", &self.inner.owns_interrupt_trap)
            .field("statistics", &self.census_snapshot())
            .field("exited", &self.inner.exited.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Os {
    /// Bootstraps the process with the default configuration.
    ///
    /// Must be called once per process. Installs the interrupt trap and
    /// routes faults to [`AbortOnFault`].
    #[track_caller]
    #[must_use]
    pub fn init() -> Self {
        OsBuilder::new().build()
    }

    /// Returns a builder for a customized context.
    #[must_use]
    pub fn builder() -> OsBuilder {
        OsBuilder::new()
    }

    /// Context for tests: faults unwind through [`PanicOnFault`] and the
    /// interrupt trap is left alone.
    #[must_use]
    pub fn for_testing() -> Self {
        OsBuilder::new()
            .catch_interrupt(false)
            .fault_handler(PanicOnFault)
            .build()
    }

    /// Routes a fault raised at `site` to the context's handler.
    pub fn trap(&self, site: &FaultSite, fault: Fault) -> ! {
        self.inner.handler.fault(site, &fault)
    }

    /// Traps with the caller's location tagged as `function`.
    #[track_caller]
    pub(crate) fn fault(&self, function: &'static str, fault: Fault) -> ! {
        self.trap(&FaultSite::caller(function), fault)
    }

    /// The configuration fixed at bootstrap.
    #[must_use]
    pub fn config(&self) -> &OsConfig {
        &self.inner.config
    }

    /// Returns the live-object counts. Traps after [`exit`](Self::exit).
    #[track_caller]
    #[must_use]
    pub fn statistics(&self) -> OsStatistics {
        self.ensure_running(&FaultSite::caller("os_statistics"));
        self.census_snapshot()
    }

    fn census_snapshot(&self) -> OsStatistics {
        let census = &self.inner.census;
        OsStatistics {
            mutex_count: census.mutexes.load(Ordering::Relaxed),
            semaphore_count: census.semaphores.load(Ordering::Relaxed),
            spinlock_count: census.spinlocks.load(Ordering::Relaxed),
            thread_count: self.inner.threads.len(),
        }
    }

    /// Lists the threads currently holding a registry slot. Traps after
    /// [`exit`](Self::exit).
    #[track_caller]
    #[must_use]
    pub fn threads(&self) -> Vec<ThreadInfo> {
        self.ensure_running(&FaultSite::caller("os_threads"));
        self.inner.threads.snapshot()
    }

    /// Starts `entry` on `thread`; see [`ThreadHandle::start`].
    #[track_caller]
    pub fn thread_start<F>(&self, thread: &ThreadHandle, name: &str, priority: ThreadPriority, entry: F)
    where
        F: FnOnce() + Send + 'static,
    {
        thread.start(name, priority, entry);
    }

    /// Releases the context.
    ///
    /// Traps if any mutex, semaphore, spinlock or thread is still live, or
    /// if the context was already exited. Restores the default `SIGINT`
    /// disposition when this context owns the interrupt trap.
    ///
    /// Clones that outlive the exit trap on `statistics`, `threads`, thread
    /// start and handle `init`.
    #[track_caller]
    pub fn exit(self) {
        if self.inner.exited.load(Ordering::Acquire) {
            self.fault("os_exit", Fault::Destroyed(ObjectKind::Os));
        }

        let stats = self.census_snapshot();
        if !stats.is_quiescent() {
            self.fault("os_exit", Fault::ResourceLeak(stats));
        }

        if self.inner.owns_interrupt_trap {
            if let Err(err) = signal::restore_interrupt_trap() {
                self.fault("os_exit", Fault::SignalInstall(err));
            }
            BOOTSTRAPPED.store(false, Ordering::Release);
        }

        self.inner.exited.store(true, Ordering::Release);
        tracing::info!("os exited");
    }

    /// Traps at `site` once the context has exited.
    pub(crate) fn ensure_running(&self, site: &FaultSite) {
        if self.inner.exited.load(Ordering::Acquire) {
            self.trap(site, Fault::Destroyed(ObjectKind::Os));
        }
    }

    pub(crate) fn census(&self) -> &Census {
        &self.inner.census
    }

    pub(crate) fn registry(&self) -> &ThreadRegistry {
        &self.inner.threads
    }
}

/// Bootstraps the process; shorthand for [`Os::init`].
#[track_caller]
#[must_use]
pub fn os_init() -> Os {
    OsBuilder::new().build()
}

/// Builder for [`Os`].
#[derive(Debug)]
pub struct OsBuilder {
    config: OsConfig,
    handler: Option<Box<dyn FaultHandler>>,
    catch_interrupt: bool,
}

impl Default for OsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OsBuilder {
    /// Creates a builder with the default configuration, the abort handler
    /// and the interrupt trap enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: OsConfig::default(),
            handler: None,
            catch_interrupt: true,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: OsConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the fault handler.
    #[must_use]
    pub fn fault_handler(mut self, handler: impl FaultHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Whether to install the `SIGINT` trap.
    #[must_use]
    pub fn catch_interrupt(mut self, enabled: bool) -> Self {
        self.catch_interrupt = enabled;
        self
    }

    /// Builds the context.
    ///
    /// Traps on an invalid configuration, on a second bootstrap that also
    /// wants the interrupt trap, and when the signal handler cannot be
    /// installed.
    #[track_caller]
    #[must_use]
    pub fn build(self) -> Os {
        let handler = self
            .handler
            .unwrap_or_else(|| Box::new(AbortOnFault) as Box<dyn FaultHandler>);
        let threads = ThreadRegistry::new(self.config.thread_limit);
        let os = Os {
            inner: Arc::new(OsInner {
                config: self.config,
                handler,
                census: Census::default(),
                threads,
                owns_interrupt_trap: self.catch_interrupt,
                exited: AtomicBool::new(false),
            }),
        };

        if let Err(err) = os.inner.config.validate() {
            os.fault("os_init", Fault::Config(err));
        }

        if self.catch_interrupt {
            if BOOTSTRAPPED.swap(true, Ordering::AcqRel) {
                os.fault("os_init", Fault::AlreadyBootstrapped);
            }
            if let Err(err) = signal::install_interrupt_trap() {
                os.fault("os_init", Fault::SignalInstall(err));
            }
        }

        tracing::info!(
            thread_limit = os.inner.config.thread_limit,
            realtime_scheduling = os.inner.config.realtime_scheduling,
            catch_interrupt = self.catch_interrupt,
            "os initialized"
        );
        os
    }
}
