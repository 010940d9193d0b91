//! Pidfile bookkeeping.
//!
//! The pidfile is the single source of truth for "is a daemon running":
//! decimal PID as text, created at successful initialization, removed on
//! exit. A stale file naming a dead PID is detected by a liveness probe and
//! deleted, never trusted.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::debug;

use crate::error::{io_err, DaemonError};

/// Read the PID recorded in `path`. Unreadable or garbled content counts as
/// "no daemon recorded".
pub fn read(path: &Path) -> Option<Pid> {
    let text = fs::read_to_string(path).ok()?;
    let pid = text.trim().parse::<i32>().ok()?;
    (pid > 0).then(|| Pid::from_raw(pid))
}

/// Liveness probe with a zero-effect signal.
pub fn probe(pid: Pid) -> bool {
    kill(pid, None).is_ok()
}

/// Delete `path`, treating an already-missing file as success.
pub fn remove(path: &Path) -> Result<(), DaemonError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}

/// An owned pidfile. Dropping the guard removes the file, so every exit
/// path out of the daemon body — normal return, error, panic unwind —
/// performs the cleanup.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Record the current process's PID at `path`.
    pub fn write_current(path: &Path) -> Result<Self, DaemonError> {
        let pid = std::process::id();
        debug!(pid, path = %path.display(), "writing pidfile");
        fs::write(path, format!("{pid}\n")).map_err(|err| io_err(path, err))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "removing pidfile");
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                debug!(path = %self.path.display(), error = %err, "pidfile removal failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_parses_decimal_pid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("daemon.pid");
        fs::write(&path, "1234\n").expect("write");
        assert_eq!(read(&path), Some(Pid::from_raw(1234)));
    }

    #[test]
    fn read_rejects_garbled_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("daemon.pid");
        fs::write(&path, "not a pid\n").expect("write");
        assert_eq!(read(&path), None);
    }

    #[test]
    fn read_missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(read(&dir.path().join("absent.pid")), None);
    }

    #[test]
    fn probe_detects_own_process() {
        assert!(probe(Pid::from_raw(std::process::id() as i32)));
    }

    #[test]
    fn probe_detects_reaped_process() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("spawn child");
        let pid = Pid::from_raw(child.id() as i32);
        child.wait().expect("reap child");
        assert!(!probe(pid));
    }

    #[test]
    fn guard_removes_file_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("daemon.pid");
        {
            let guard = PidFile::write_current(&path).expect("write");
            assert_eq!(guard.path(), path.as_path());
            assert_eq!(read(&path), Some(Pid::from_raw(std::process::id() as i32)));
        }
        assert!(!path.exists(), "guard drop must remove the pidfile");
    }

    #[test]
    fn remove_tolerates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        remove(&dir.path().join("absent.pid")).expect("no-op remove");
    }
}
