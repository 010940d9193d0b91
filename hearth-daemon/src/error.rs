//! Error types for the daemon lifecycle manager.

use std::path::PathBuf;

use thiserror::Error;

/// Error surface for daemonization, pidfile bookkeeping, and process control.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A live daemon already owns the pidfile.
    #[error("already running with PID {0}")]
    AlreadyRunning(i32),

    /// One of the two detachment forks failed. Fatal.
    #[error("{stage} fork failed: {source}")]
    Fork {
        stage: &'static str,
        source: nix::errno::Errno,
    },

    /// Creating a new session for the detached child failed.
    #[error("failed to detach session: {0}")]
    Detach(nix::errno::Errno),

    /// Installing a signal handler or delivering a signal failed.
    #[error("signal error: {0}")]
    Signal(nix::errno::Errno),

    /// Filesystem failure around the pidfile or stdio redirection targets.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The caller-supplied init or run body failed.
    #[error("daemon body failed: {0}")]
    Runtime(String),
}

impl DaemonError {
    /// Wrap a host-tool failure from the init or run body.
    pub fn runtime(err: impl std::fmt::Display) -> Self {
        Self::Runtime(err.to_string())
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
