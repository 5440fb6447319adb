//! Bootstrap configuration.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `thread_limit` | 16 |
//! | `thread_stack_size` | `None` (platform default) |
//! | `realtime_scheduling` | `false` |
//!
//! The configuration is fixed once the [`Os`](crate::Os) context is built;
//! there is no dynamic reconfiguration.

/// Default number of thread registry slots.
pub const DEFAULT_THREAD_LIMIT: usize = 16;

/// Upper bound accepted for `thread_limit`.
pub const MAX_THREAD_LIMIT: usize = 1024;

/// Size of a thread name buffer, including the terminator.
pub const THREAD_NAME_LEN: usize = 16;

/// Smallest stack accepted for spawned threads.
pub const MIN_THREAD_STACK_SIZE: usize = 16 * 1024;

/// Configuration of the bootstrap context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsConfig {
    /// Number of thread registry slots.
    pub thread_limit: usize,
    /// Stack size for spawned threads. `None` uses the platform default.
    pub thread_stack_size: Option<usize>,
    /// Apply `SCHED_RR` with the tier priority in every started thread.
    ///
    /// Usually requires `CAP_SYS_NICE`; a refused request traps.
    pub realtime_scheduling: bool,
}

impl Default for OsConfig {
    fn default() -> Self {
        Self {
            thread_limit: DEFAULT_THREAD_LIMIT,
            thread_stack_size: None,
            realtime_scheduling: false,
        }
    }
}

impl OsConfig {
    /// Sets the number of thread registry slots.
    #[must_use]
    pub fn thread_limit(mut self, limit: usize) -> Self {
        self.thread_limit = limit;
        self
    }

    /// Sets the stack size of spawned threads.
    #[must_use]
    pub fn thread_stack_size(mut self, size: Option<usize>) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Enables or disables round-robin realtime scheduling.
    #[must_use]
    pub fn realtime_scheduling(mut self, enabled: bool) -> Self {
        self.realtime_scheduling = enabled;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_limit == 0 || self.thread_limit > MAX_THREAD_LIMIT {
            return Err(ConfigError::InvalidThreadLimit(self.thread_limit));
        }

        if let Some(size) = self.thread_stack_size {
            if size < MIN_THREAD_STACK_SIZE {
                return Err(ConfigError::StackTooSmall(size));
            }
        }

        Ok(())
    }
}

/// Configuration validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `thread_limit` outside `1..=MAX_THREAD_LIMIT`.
    #[error("thread limit {0} outside 1..={MAX_THREAD_LIMIT}")]
    InvalidThreadLimit(usize),
    /// `thread_stack_size` below [`MIN_THREAD_STACK_SIZE`].
    #[error("thread stack size {0} below {MIN_THREAD_STACK_SIZE} bytes")]
    StackTooSmall(usize),
}
