//! Platform-specific process primitives: liveness, signals and identities.

use crate::error::{Result, SupervisorError};
use crate::process::ProcessSignal;
use tracing::debug;

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: Uses `kill(pid, 0)`; `EPERM` still means the process exists
/// - **Other**: Always `false`; callers rely on their child handle instead
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Deliver a signal to a process.
///
/// A process that no longer exists is not an error: the caller's liveness
/// check observes the exit on its next pass.
pub fn send_signal(pid: u32, signal: ProcessSignal) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let nix_signal = match signal {
            ProcessSignal::Terminate => Signal::SIGTERM,
            ProcessSignal::Kill => Signal::SIGKILL,
            ProcessSignal::Pause => Signal::SIGSTOP,
            ProcessSignal::Resume => Signal::SIGCONT,
        };

        debug!("Sending {:?} to process {}", nix_signal, pid);
        match kill(Pid::from_raw(pid as i32), nix_signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                debug!("Process {} already gone", pid);
                Ok(())
            }
            Err(e) => Err(SupervisorError::Other(format!(
                "Failed to send {:?} to process {}: {}",
                nix_signal, pid, e
            ))),
        }
    }

    #[cfg(not(unix))]
    {
        Err(SupervisorError::Other(format!(
            "Signal {:?} for process {} not supported on this platform",
            signal, pid
        )))
    }
}

/// Resolve a user name to the `(uid, gid)` pair a child should run as.
pub fn resolve_identity(name: &str) -> Result<(u32, u32)> {
    #[cfg(unix)]
    {
        use nix::unistd::User;

        match User::from_name(name) {
            Ok(Some(user)) => Ok((user.uid.as_raw(), user.gid.as_raw())),
            Ok(None) => Err(SupervisorError::Other(format!("Unknown user: {}", name))),
            Err(e) => Err(SupervisorError::Other(format!(
                "Failed to look up user {}: {}",
                name, e
            ))),
        }
    }

    #[cfg(not(unix))]
    {
        Err(SupervisorError::Other(format!(
            "Running as user {} not supported on this platform",
            name
        )))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_is_process_alive_self() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        // Above the kernel's pid_max
        assert!(!is_process_alive(999_999_999));
    }

    #[test]
    fn test_signal_nonexistent_is_ok() {
        assert!(send_signal(999_999_999, ProcessSignal::Terminate).is_ok());
    }

    #[test]
    fn test_resolve_root_identity() {
        assert_eq!(resolve_identity("root").unwrap(), (0, 0));
    }

    #[test]
    fn test_resolve_unknown_identity() {
        assert!(resolve_identity("no-such-user-sysvisor").is_err());
    }
}
