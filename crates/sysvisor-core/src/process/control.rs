//! The narrow OS process contract the supervisor depends on.

use crate::domain::ProcessDescriptor;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to a spawned OS process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub fn from_pid(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Signals the supervisor sends to managed processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessSignal {
    /// Polite termination request (SIGTERM).
    Terminate,
    /// Forced termination (SIGKILL).
    Kill,
    /// Pause execution (SIGSTOP).
    Pause,
    /// Continue a paused process (SIGCONT).
    Resume,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, when killed by a signal.
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Status of a process that is gone but could not be reaped.
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            Self {
                code: status.code(),
                signal: status.signal(),
            }
        }

        #[cfg(not(unix))]
        {
            Self {
                code: status.code(),
                signal: None,
            }
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// OS-level process primitive.
///
/// Implementations must be cheap to call from the monitor tick: `is_alive`
/// and `exit_status` never block on the child.
pub trait ProcessControl: Send + Sync + 'static {
    /// Spawn the process described by `descriptor`.
    fn spawn(&self, descriptor: &ProcessDescriptor) -> Result<ProcessHandle>;

    /// Deliver a signal. Signalling a process that is already gone succeeds.
    fn signal(&self, handle: &ProcessHandle, signal: ProcessSignal) -> Result<()>;

    /// Whether the process is still running (paused processes are alive).
    fn is_alive(&self, handle: &ProcessHandle) -> bool;

    /// Exit status of a process that is no longer alive, if it was collected.
    fn exit_status(&self, handle: &ProcessHandle) -> Option<ExitStatus>;

    /// Stop tracking a process that could not be killed. Its record has been
    /// finalized; nothing will ask about this handle again.
    fn release(&self, _handle: &ProcessHandle) {}
}
