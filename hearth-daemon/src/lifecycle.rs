//! Daemon lifecycle: double-fork detachment, pidfile ownership, and
//! start/stop/restart/status process control.
//!
//! `start` takes the service body as two closures: `init` runs once the
//! process owns its pidfile (still attached to the original stdio in
//! foreground mode), and `run` is the long-lived body. The body is expected
//! to poll [`crate::signals::termination_requested`] and return when asked,
//! so the pidfile guard unwinds on the normal path.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{fork, setsid, ForkResult, Pid};
use tracing::{debug, info};

use crate::error::{io_err, DaemonError};
use crate::pidfile::{self, PidFile};
use crate::signals;

/// How long `stop` waits between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// How long a surviving first parent waits for the double fork to settle.
const PARENT_SETTLE_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_STDIN: &str = "/dev/stdin";
const DEFAULT_STDOUT: &str = "/dev/null";
const DEFAULT_STDERR: &str = "/dev/null";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for a managed daemon.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Location of the pidfile owned by the running daemon.
    pub pidfile: PathBuf,
    /// Run in the calling process without detaching.
    pub foreground: bool,
    /// Exit the original parent after the first fork. When false the parent
    /// survives and `start` returns [`StartOutcome::Parent`] to it.
    pub exit_parent: bool,
    /// Raise SIGSTOP once initialized, for an external supervisor to resume.
    pub raise_stop: bool,
    /// Stdio redirection targets for the detached child.
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl DaemonOptions {
    pub fn new(pidfile: impl Into<PathBuf>) -> Self {
        Self {
            pidfile: pidfile.into(),
            foreground: false,
            exit_parent: true,
            raise_stop: false,
            stdin: PathBuf::from(DEFAULT_STDIN),
            stdout: PathBuf::from(DEFAULT_STDOUT),
            stderr: PathBuf::from(DEFAULT_STDERR),
        }
    }
}

/// Which process a successful `start` returned in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The daemon body ran to completion in this process.
    Finished,
    /// This is the surviving original parent; the daemon continues in a
    /// detached child.
    Parent,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Lifecycle manager for a single pidfile-owned daemon.
pub struct Daemon {
    options: DaemonOptions,
}

impl Daemon {
    pub fn new(mut options: DaemonOptions) -> Self {
        // Foreground mode has no surviving parent to hand control back to.
        if options.foreground {
            options.exit_parent = true;
        }
        Self { options }
    }

    pub fn options(&self) -> &DaemonOptions {
        &self.options
    }

    /// Start the daemon: refuse if a live instance owns the pidfile, detach
    /// unless running in the foreground, then hand control to the body.
    pub fn start<I, R>(&self, init: I, run: R) -> Result<StartOutcome, DaemonError>
    where
        I: FnOnce() -> Result<(), DaemonError>,
        R: FnOnce() -> Result<(), DaemonError>,
    {
        debug!("starting daemon");

        if let Some(pid) = pidfile::read(&self.options.pidfile) {
            if pidfile::probe(pid) {
                return Err(DaemonError::AlreadyRunning(pid.as_raw()));
            }
            debug!(pid = pid.as_raw(), "removing stale pidfile");
            pidfile::remove(&self.options.pidfile)?;
        }

        if !self.options.foreground && !self.detach()? {
            return Ok(StartOutcome::Parent);
        }

        signals::install_termination_handler()?;
        let _pidfile = PidFile::write_current(&self.options.pidfile)?;

        init()?;

        if self.options.raise_stop {
            kill(Pid::this(), Signal::SIGSTOP).map_err(DaemonError::Signal)?;
        }

        if !self.options.foreground {
            self.redirect_stdio()?;
        }

        run()?;
        info!("daemon body finished");
        Ok(StartOutcome::Finished)
    }

    /// Stop the daemon named by the pidfile: SIGTERM, wait out the grace
    /// period, then SIGKILL. A dead PID at either step means the daemon is
    /// already gone, so the stale pidfile is removed. Missing pidfile is a
    /// no-op.
    pub fn stop(&self, grace_period: Duration) -> Result<(), DaemonError> {
        debug!("stopping daemon");

        let Some(pid) = pidfile::read(&self.options.pidfile) else {
            debug!("daemon not running");
            return Ok(());
        };

        debug!(pid = pid.as_raw(), "terminating process");
        match kill(pid, Signal::SIGTERM) {
            Ok(()) => {
                thread::sleep(grace_period);
                match kill(pid, Signal::SIGKILL) {
                    // The daemon outlived the grace period and was killed
                    // without cleaning up; the next start reaps the pidfile.
                    Ok(()) => {}
                    Err(Errno::ESRCH) => pidfile::remove(&self.options.pidfile)?,
                    Err(errno) => return Err(DaemonError::Signal(errno)),
                }
            }
            Err(Errno::ESRCH) => pidfile::remove(&self.options.pidfile)?,
            Err(errno) => return Err(DaemonError::Signal(errno)),
        }
        Ok(())
    }

    /// Stop then start with the same options.
    pub fn restart<I, R>(
        &self,
        grace_period: Duration,
        init: I,
        run: R,
    ) -> Result<StartOutcome, DaemonError>
    where
        I: FnOnce() -> Result<(), DaemonError>,
        R: FnOnce() -> Result<(), DaemonError>,
    {
        debug!("restarting daemon");
        self.stop(grace_period)?;
        self.start(init, run)
    }

    /// PID of the live daemon, if the pidfile names a running process.
    pub fn status(&self) -> Option<i32> {
        let pid = pidfile::read(&self.options.pidfile)?;
        pidfile::probe(pid).then(|| pid.as_raw())
    }

    /// Double fork. Returns true in the final child, false in the surviving
    /// first parent when `exit_parent` is off.
    fn detach(&self) -> Result<bool, DaemonError> {
        debug!(pid = std::process::id(), "detaching from parent");

        match unsafe { fork() }.map_err(|errno| DaemonError::Fork {
            stage: "first",
            source: errno,
        })? {
            ForkResult::Parent { child } => {
                if self.options.exit_parent {
                    debug!(child = child.as_raw(), "exiting first parent");
                    std::process::exit(0);
                }
                // Let the double fork complete before the caller resumes.
                thread::sleep(PARENT_SETTLE_DELAY);
                return Ok(false);
            }
            ForkResult::Child => {}
        }

        // Decouple from the parent environment.
        std::env::set_current_dir("/").map_err(|err| io_err("/", err))?;
        setsid().map_err(DaemonError::Detach)?;
        umask(Mode::empty());

        match unsafe { fork() }.map_err(|errno| DaemonError::Fork {
            stage: "second",
            source: errno,
        })? {
            ForkResult::Parent { .. } => std::process::exit(0),
            ForkResult::Child => {}
        }

        debug!(pid = std::process::id(), "detached");
        Ok(true)
    }

    /// Point fds 0-2 at the configured targets so nothing leaks to the
    /// terminal the daemon was launched from.
    fn redirect_stdio(&self) -> Result<(), DaemonError> {
        debug!("redirecting stdio");

        let stdin = File::open(&self.options.stdin)
            .map_err(|err| io_err(&self.options.stdin, err))?;
        let stdout = open_append(&self.options.stdout)?;
        let stderr = open_append(&self.options.stderr)?;

        dup_onto(stdin.as_raw_fd(), libc::STDIN_FILENO, &self.options.stdin)?;
        dup_onto(stdout.as_raw_fd(), libc::STDOUT_FILENO, &self.options.stdout)?;
        dup_onto(stderr.as_raw_fd(), libc::STDERR_FILENO, &self.options.stderr)?;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File, DaemonError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| io_err(path, err))
}

fn dup_onto(src: libc::c_int, dst: libc::c_int, path: &Path) -> Result<(), DaemonError> {
    if unsafe { libc::dup2(src, dst) } < 0 {
        return Err(io_err(path, std::io::Error::last_os_error()));
    }
    Ok(())
}
