//! SIGTERM handling for cooperative shutdown.
//!
//! The handler only flips an atomic flag; the daemon body polls
//! [`termination_requested`] between units of work and unwinds through its
//! normal return path, which lets the pidfile guard run. Repeated SIGTERMs
//! while shutdown is in flight are absorbed by the same flag.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::DaemonError;

static TERMINATION_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigterm(_signal: libc::c_int) {
    TERMINATION_REQUESTED.store(true, Ordering::SeqCst);
}

/// Install the SIGTERM handler. Called once after detaching.
pub fn install_termination_handler() -> Result<(), DaemonError> {
    let action = SigAction::new(
        SigHandler::Handler(handle_sigterm),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // Safety: the handler is async-signal-safe, it only stores to an atomic.
    unsafe { sigaction(Signal::SIGTERM, &action) }.map_err(DaemonError::Signal)?;
    Ok(())
}

/// Whether a SIGTERM has been delivered since the handler was installed.
pub fn termination_requested() -> bool {
    TERMINATION_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    TERMINATION_REQUESTED.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    use super::*;

    #[test]
    fn sigterm_sets_the_flag() {
        reset_for_tests();
        install_termination_handler().expect("install handler");
        assert!(!termination_requested());

        kill(Pid::this(), Signal::SIGTERM).expect("self-signal");
        wait_for_flag();

        // A second delivery is absorbed without any further effect.
        kill(Pid::this(), Signal::SIGTERM).expect("self-signal");
        wait_for_flag();

        reset_for_tests();
    }

    // Delivery is asynchronous; give the kernel a moment.
    fn wait_for_flag() {
        for _ in 0..100 {
            if termination_requested() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("SIGTERM was not observed");
    }
}
