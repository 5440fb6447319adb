//! Fault reporting: the single error sink of the crate.
//!
//! Nothing in this crate returns an error to its caller. Every precondition
//! violation and every failure reported by the underlying primitive ends in a
//! *trap*: one diagnostic line naming the call site is written to stderr and
//! the process aborts with `SIGABRT`, producing a core dump.
//!
//! # Components
//!
//! - [`FaultSite`]: file, function and line of the faulting call
//! - [`Fault`]: typed cause of a trap, used for logging only
//! - [`FaultHandler`]: the sink; [`AbortOnFault`] is the default
//! - [`PanicOnFault`] and [`catch_fault`]: test hook that turns a trap into
//!   an unwinding panic so the fault can be inspected
//! - [`trap!`](crate::trap!), [`trap_if!`](crate::trap_if!): the guard
//!   convention used at the entry and exit of every primitive operation
//!
//! # Diagnostic line
//!
//! ```text
//! *** core dump at "src/bin/battery.rs", "MutexHandle::enter", 42
//! ```
//!
//! # Example
//!
//! ```ignore
//! use vanos::{trap_if, Os};
//!
//! let os = Os::init();
//! let ready = false;
//! trap_if!(os, !ready);
//! ```

use std::any::Any;
use std::fmt;
use std::io::{self, Write as _};
use std::panic::{self, AssertUnwindSafe, Location};

use crate::config::ConfigError;
use crate::os::OsStatistics;

/// Call-site descriptor carried by every trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultSite {
    file: &'static str,
    function: &'static str,
    line: u32,
}

impl FaultSite {
    /// Creates a site from explicit components.
    #[must_use]
    pub const fn new(file: &'static str, function: &'static str, line: u32) -> Self {
        Self {
            file,
            function,
            line,
        }
    }

    /// Captures the file and line of the caller, tagged with `function`.
    ///
    /// Inside a `#[track_caller]` chain this resolves to the outermost
    /// caller, so a primitive operation reports where the user invoked it.
    #[track_caller]
    #[must_use]
    pub fn caller(function: &'static str) -> Self {
        let location = Location::caller();
        Self::new(location.file(), function, location.line())
    }

    /// Source file of the call site.
    #[must_use]
    pub const fn file(&self) -> &'static str {
        self.file
    }

    /// Function or operation name of the call site.
    #[must_use]
    pub const fn function(&self) -> &'static str {
        self.function
    }

    /// Line of the call site.
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }

    /// The exact line written to stderr before the process aborts.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        format!("*** core dump at {self}")
    }
}

impl fmt::Display for FaultSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\", \"{}\", {}", self.file, self.function, self.line)
    }
}

/// The kind of object a fault refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A recursive mutex handle.
    Mutex,
    /// A counting semaphore handle.
    Semaphore,
    /// A spinlock handle.
    Spinlock,
    /// A thread handle.
    Thread,
    /// The bootstrap context.
    Os,
}

impl ObjectKind {
    /// Returns a short lowercase name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Mutex => "mutex",
            Self::Semaphore => "semaphore",
            Self::Spinlock => "spinlock",
            Self::Thread => "thread",
            Self::Os => "os",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a trap fired.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Fault {
    /// Operation on a handle that was never initialized.
    #[error("{0} used before init")]
    Uninitialized(ObjectKind),

    /// `init` on a handle that is already live.
    #[error("{0} initialized twice")]
    AlreadyInitialized(ObjectKind),

    /// Operation on a handle after `destroy`.
    #[error("{0} used after destroy")]
    Destroyed(ObjectKind),

    /// Release by a thread that does not hold the lock.
    #[error("{0} released by a thread that does not own it")]
    NotOwner(ObjectKind),

    /// `destroy` while the object is held or waited on.
    #[error("{0} destroyed while in use")]
    Busy(ObjectKind),

    /// A counter would exceed its maximum.
    #[error("{0} counter overflow")]
    Overflow(ObjectKind),

    /// A non-recursive lock re-acquired by its owner.
    #[error("{0} re-acquired by its owner")]
    WouldDeadlock(ObjectKind),

    /// An argument outside the accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The interrupt signal handler could not be installed or restored.
    #[error("signal handler installation failed: {0}")]
    SignalInstall(#[source] nix::Error),

    /// The OS refused to create a thread.
    #[error("thread spawn failed: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// The OS refused the requested scheduling policy.
    #[error("thread scheduling failed: {0}")]
    Scheduling(#[source] io::Error),

    /// No free slot in the thread registry.
    #[error("thread registry full ({limit} slots)")]
    RegistryFull {
        /// Configured registry size.
        limit: usize,
    },

    /// A thread entry function panicked.
    #[error("thread `{0}` panicked")]
    ThreadPanicked(String),

    /// A second bootstrap while the first still owns the interrupt trap.
    #[error("os already bootstrapped")]
    AlreadyBootstrapped,

    /// Objects still live at `exit`.
    #[error("resources still live at exit: {0}")]
    ResourceLeak(OsStatistics),

    /// Invalid bootstrap configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A guard condition held.
    #[error("condition `{0}` holds")]
    Condition(&'static str),
}

/// The sink every trap is routed to. Must never return.
pub trait FaultHandler: Send + Sync + fmt::Debug {
    /// Handles a fault raised at `site`.
    fn fault(&self, site: &FaultSite, fault: &Fault) -> !;
}

/// Default handler: diagnostic line on stderr, then `abort()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortOnFault;

impl FaultHandler for AbortOnFault {
    fn fault(&self, site: &FaultSite, fault: &Fault) -> ! {
        report(site, fault);
        std::process::abort()
    }
}

/// Writes the diagnostic line for `site` to stderr and logs `fault`.
pub fn report(site: &FaultSite, fault: &Fault) {
    tracing::error!(
        file = site.file(),
        function = site.function(),
        line = site.line(),
        %fault,
        "fault"
    );
    let mut stderr = io::stderr().lock();
    // Nothing sensible is left to do if stderr is gone; the abort follows.
    let _ = writeln!(stderr, "{}", site.diagnostic());
    let _ = stderr.flush();
}

/// Payload of the panic raised by [`PanicOnFault`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReport {
    /// Where the fault was raised.
    pub site: FaultSite,
    /// Rendered [`Fault`].
    pub message: String,
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.site.diagnostic(), self.message)
    }
}

/// Test hook: unwinds with a [`FaultReport`] payload instead of aborting.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicOnFault;

impl FaultHandler for PanicOnFault {
    fn fault(&self, site: &FaultSite, fault: &Fault) -> ! {
        tracing::warn!(site = %site, %fault, "fault raised under PanicOnFault");
        panic::panic_any(FaultReport {
            site: *site,
            message: fault.to_string(),
        })
    }
}

/// Runs `f`, converting a [`PanicOnFault`] trap into `Err`.
///
/// Panics that are not traps are resumed.
pub fn catch_fault<R>(f: impl FnOnce() -> R) -> Result<R, FaultReport> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(downcast_report)
}

fn downcast_report(payload: Box<dyn Any + Send>) -> FaultReport {
    match payload.downcast::<FaultReport>() {
        Ok(report) => *report,
        Err(other) => panic::resume_unwind(other),
    }
}

/// Expands to the name of the enclosing function.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let name = name.strip_suffix("::f").unwrap_or(name);
        let name = name.trim_end_matches("::{{closure}}");
        match name.rfind("::") {
            Some(pos) => &name[pos + 2..],
            None => name,
        }
    }};
}

/// Unconditionally traps through the given context.
///
/// ```ignore
/// vanos::trap!(os);
/// vanos::trap!(os, Fault::InvalidArgument("port".into()));
/// ```
#[macro_export]
macro_rules! trap {
    ($os:expr) => {
        $os.trap(
            &$crate::trap::FaultSite::new(file!(), $crate::function_name!(), line!()),
            $crate::trap::Fault::Condition("trap"),
        )
    };
    ($os:expr, $fault:expr) => {
        $os.trap(
            &$crate::trap::FaultSite::new(file!(), $crate::function_name!(), line!()),
            $fault,
        )
    };
}

/// Traps through the given context when `cond` holds.
#[macro_export]
macro_rules! trap_if {
    ($os:expr, $cond:expr) => {
        if $cond {
            $crate::trap!($os, $crate::trap::Fault::Condition(stringify!($cond)));
        }
    };
    ($os:expr, $cond:expr, $fault:expr) => {
        if $cond {
            $crate::trap!($os, $fault);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Os;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn site_renders_diagnostic_line() {
        init_test("site_renders_diagnostic_line");
        let site = FaultSite::new("src/os.rs", "os_init", 42);
        let line = site.diagnostic();
        crate::assert_with_log!(
            line == "*** core dump at \"src/os.rs\", \"os_init\", 42",
            "diagnostic line",
            "*** core dump at \"src/os.rs\", \"os_init\", 42",
            line
        );
        crate::test_complete!("site_renders_diagnostic_line");
    }

    #[test]
    fn caller_captures_this_file() {
        init_test("caller_captures_this_file");
        let expected_line = line!() + 1;
        let site = FaultSite::caller("caller_check");
        crate::assert_with_log!(site.file() == file!(), "file", file!(), site.file());
        crate::assert_with_log!(
            site.line() == expected_line,
            "line",
            expected_line,
            site.line()
        );
        crate::test_complete!("caller_captures_this_file");
    }

    #[test]
    fn function_name_strips_path() {
        init_test("function_name_strips_path");
        let name = crate::function_name!();
        crate::assert_with_log!(
            name == "function_name_strips_path",
            "name",
            "function_name_strips_path",
            name
        );
        let in_closure = (|| crate::function_name!())();
        crate::assert_with_log!(
            in_closure == "function_name_strips_path",
            "closure name",
            "function_name_strips_path",
            in_closure
        );
        crate::test_complete!("function_name_strips_path");
    }

    #[test]
    fn trap_if_false_has_no_effect() {
        init_test("trap_if_false_has_no_effect");
        let os = Os::for_testing();
        let result = catch_fault(|| {
            crate::trap_if!(os, 1 + 1 == 3);
            7
        });
        crate::assert_with_log!(matches!(result, Ok(7)), "no trap", "Ok(7)", result);
        crate::test_complete!("trap_if_false_has_no_effect");
    }

    #[test]
    fn trap_if_true_reports_condition_and_site() {
        init_test("trap_if_true_reports_condition_and_site");
        let os = Os::for_testing();
        let expected_line = line!() + 1;
        let report = catch_fault(|| crate::trap_if!(os, 2 > 1)).unwrap_err();
        crate::assert_with_log!(
            report.site.line() == expected_line,
            "line",
            expected_line,
            report.site.line()
        );
        crate::assert_with_log!(
            report.site.function() == "trap_if_true_reports_condition_and_site",
            "function",
            "trap_if_true_reports_condition_and_site",
            report.site.function()
        );
        let has_cond = report.message.contains("2 > 1");
        crate::assert_with_log!(has_cond, "condition text", true, has_cond);
        crate::test_complete!("trap_if_true_reports_condition_and_site");
    }

    #[test]
    fn catch_fault_resumes_foreign_panics() {
        init_test("catch_fault_resumes_foreign_panics");
        let outer = panic::catch_unwind(|| catch_fault(|| panic!("not a trap")));
        crate::assert_with_log!(outer.is_err(), "foreign panic resumed", true, outer.is_err());
        crate::test_complete!("catch_fault_resumes_foreign_panics");
    }

    #[test]
    fn fault_display() {
        init_test("fault_display");
        let msg = Fault::NotOwner(ObjectKind::Mutex).to_string();
        crate::assert_with_log!(
            msg == "mutex released by a thread that does not own it",
            "display",
            "mutex released by a thread that does not own it",
            msg
        );
        let msg = Fault::RegistryFull { limit: 2 }.to_string();
        let has_limit = msg.contains("2 slots");
        crate::assert_with_log!(has_limit, "limit in message", true, has_limit);
        crate::test_complete!("fault_display");
    }
}
