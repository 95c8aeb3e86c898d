//! OS-level liveness probe and signal delivery by pid.
//!
//! Both go through `kill(2)`: a probe is `kill(pid, 0)`.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::error::WorkerError;

/// Result of a signal-0 probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    /// The process exists and we may signal it.
    Running,
    /// The process exists but belongs to someone else (`EPERM`).
    PermissionDenied,
    /// No such process (`ESRCH`).
    NotFound,
    /// The probe failed for another reason.
    Failed(Errno),
}

impl Liveness {
    /// `PermissionDenied` counts as running: a process we cannot confirm dead
    /// must not be replaced underneath.
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, Liveness::Running | Liveness::PermissionDenied)
    }
}

/// Converts a pid, refusing values `kill(2)` would treat as a process group.
fn to_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

/// Probes whether `pid` is alive.
pub fn probe(pid: u32) -> Liveness {
    let Some(target) = to_pid(pid) else {
        return Liveness::NotFound;
    };
    match kill(target, None) {
        Ok(()) => Liveness::Running,
        Err(Errno::EPERM) => Liveness::PermissionDenied,
        Err(Errno::ESRCH) => Liveness::NotFound,
        Err(e) => {
            tracing::warn!(pid, error = %e, "liveness probe failed");
            Liveness::Failed(e)
        }
    }
}

/// Delivers `signal` to `pid`.
///
/// `ESRCH` maps to [`WorkerError::NotRunning`], which callers treat as
/// "already gone".
pub fn deliver(pid: u32, signal: Signal) -> Result<(), WorkerError> {
    let target = to_pid(pid).ok_or(WorkerError::NotRunning { pid })?;
    match kill(target, signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(WorkerError::NotRunning { pid }),
        Err(source) => Err(WorkerError::Signal { pid, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_self_is_running() {
        assert_eq!(probe(std::process::id()), Liveness::Running);
    }

    #[test]
    fn test_probe_rejects_group_pids() {
        assert_eq!(probe(0), Liveness::NotFound);
        assert_eq!(probe(u32::MAX), Liveness::NotFound);
        assert!(matches!(
            deliver(0, Signal::SIGKILL),
            Err(WorkerError::NotRunning { pid: 0 })
        ));
    }

    #[test]
    fn test_permission_denied_counts_as_running() {
        assert!(Liveness::PermissionDenied.is_running());
        assert!(!Liveness::NotFound.is_running());
        assert!(!Liveness::Failed(Errno::EINVAL).is_running());
    }

    #[test]
    fn test_probe_reaped_child_not_found() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert_eq!(probe(pid), Liveness::NotFound);
        assert!(deliver(pid, Signal::SIGTERM).unwrap_err().is_gone());
    }
}
