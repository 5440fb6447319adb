#![allow(unsafe_code)]
//! Interrupt trap: turn `SIGINT` into a core dump.
//!
//! This module uses unsafe code for `sigaction` and for the handler body,
//! which may only call async-signal-safe functions (`write`, `abort`).

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet};

use super::SignalKind;

/// Written to stderr by the handler before it aborts.
const INTERRUPT_MESSAGE: &[u8] = concat!(
    "on_interrupt: received SIGINT, generate a core dump.\n",
    "*** core dump at \"",
    file!(),
    "\", \"on_interrupt\", ",
    line!(),
    "\n"
)
.as_bytes();

extern "C" fn on_interrupt(signo: libc::c_int) {
    if signo != libc::SIGINT {
        return;
    }
    // SAFETY: write(2) and abort(3) are async-signal-safe; the buffer is a
    // static with the given length.
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            INTERRUPT_MESSAGE.as_ptr().cast(),
            INTERRUPT_MESSAGE.len(),
        );
        libc::abort();
    }
}

/// Installs the handler for [`SignalKind::Interrupt`].
pub(crate) fn install_interrupt_trap() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only calls async-signal-safe functions.
    unsafe { signal::sigaction(SignalKind::Interrupt.as_nix(), &action) }?;
    tracing::debug!(signal = %SignalKind::Interrupt, "interrupt trap installed");
    Ok(())
}

/// Restores the default disposition for [`SignalKind::Interrupt`].
pub(crate) fn restore_interrupt_trap() -> nix::Result<()> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_DFL is always a valid disposition.
    unsafe { signal::sigaction(SignalKind::Interrupt.as_nix(), &action) }?;
    tracing::debug!(signal = %SignalKind::Interrupt, "interrupt trap removed");
    Ok(())
}
