//! POSIX daemon lifecycle: double-fork detachment, pidfile ownership, and
//! start/stop/restart/status control.

#![cfg(unix)]

mod error;
pub mod lifecycle;
pub mod pidfile;
pub mod signals;

pub use error::DaemonError;
pub use lifecycle::{Daemon, DaemonOptions, StartOutcome, DEFAULT_GRACE_PERIOD};
pub use signals::{install_termination_handler, termination_requested};
