//! Signals the shim installs handlers for.

use nix::sys::signal::Signal;

/// Unix signals the shim traps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SignalKind {
    /// SIGINT - Interrupt from keyboard (Ctrl+C).
    Interrupt,
}

impl SignalKind {
    /// Returns the `nix` signal.
    #[must_use]
    pub const fn as_nix(&self) -> Signal {
        match self {
            Self::Interrupt => Signal::SIGINT,
        }
    }

    /// Returns the name of the signal.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
