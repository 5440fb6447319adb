//! Signal handling for the bootstrap.
//!
//! # Components
//!
//! - [`SignalKind`]: the signals the shim traps
//! - the interrupt trap, installed by [`os_init`](crate::os_init): on
//!   `SIGINT` the process prints a diagnostic and aborts with a core dump
//!   instead of shutting down gracefully
//!
//! The handler is process-global; [`Os`](crate::Os) makes sure only one
//! context owns it at a time and removes it again on
//! [`Os::exit`](crate::Os::exit).

mod interrupt;
mod kind;

pub(crate) use interrupt::{install_interrupt_trap, restore_interrupt_trap};
pub use kind::SignalKind;
