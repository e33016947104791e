//! Host-local process liveness probing.
//!
//! Presence keys store the owning process id, so liveness is decided by
//! sending signal 0 to that pid on the current host. The answer is only
//! meaningful on the host that wrote the key.

use crate::types::Pid;

/// Decides whether a process id refers to a live process.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: Pid) -> bool;
}

/// Probe backed by `kill(pid, 0)`.
///
/// `EPERM` means the process exists but belongs to another user, so it is
/// reported as alive. Non-positive pids address process groups and are
/// never considered alive.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProbe;

impl ProcessProbe for SignalProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: Pid) -> bool {
        if pid <= 0 {
            return false;
        }

        // Safety: signal 0 performs permission and existence checks only.
        let ret = unsafe { libc::kill(pid, 0) };
        if ret == 0 {
            return true;
        }

        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: Pid) -> bool {
        false
    }
}

/// Process id of the running process.
pub fn current_pid() -> Pid {
    Pid::try_from(std::process::id()).unwrap_or(Pid::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(SignalProbe.is_alive(current_pid()));
    }

    #[test]
    fn non_positive_pids_are_never_alive() {
        assert!(!SignalProbe.is_alive(0));
        assert!(!SignalProbe.is_alive(-1));
    }

    #[test]
    fn reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("spawn `true`");
        let pid = child.id() as Pid;
        child.wait().expect("wait for child");

        assert!(!SignalProbe.is_alive(pid));
    }
}
