//! Runtime state for one domain.
//!
//! Transitions are methods on [`ProcessRecord`] so every caller goes through
//! the same checks:
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!                        Running <-> Suspended
//!                                    Suspended -> Stopping
//! ```

use super::ProcessDescriptor;
use crate::catalog::qualified_name;
use crate::error::{Result, SupervisorError};
use crate::process::{ExitStatus, ProcessHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Suspended,
    Stopping,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Suspended => "suspended",
            ProcessState::Stopping => "stopping",
        }
    }

    /// Whether an OS process backs this state.
    pub fn has_process(&self) -> bool {
        !matches!(self, ProcessState::Stopped)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable runtime state for one domain, owned by the registry.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    descriptor: Arc<ProcessDescriptor>,
    state: ProcessState,
    handle: Option<ProcessHandle>,
    last_exit_status: Option<ExitStatus>,
    restart_on_exit: bool,
    /// Removed from the config file by an external edit; no longer saved.
    detached: bool,
    restart_count: u32,
}

/// Serializable view of a record, returned by queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub domain: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub persistent: bool,
    pub on_demand: bool,
    pub hidden: bool,
    pub restart_on_exit: bool,
    pub last_exit_status: Option<ExitStatus>,
    pub restart_count: u32,
    pub catalog_name: String,
}

impl ProcessRecord {
    pub(crate) fn new(descriptor: Arc<ProcessDescriptor>) -> Self {
        Self {
            descriptor,
            state: ProcessState::Stopped,
            handle: None,
            last_exit_status: None,
            restart_on_exit: false,
            detached: false,
            restart_count: 0,
        }
    }

    pub fn domain(&self) -> &str {
        &self.descriptor.domain
    }

    pub fn descriptor(&self) -> &Arc<ProcessDescriptor> {
        &self.descriptor
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// OS handle, present while a process backs the record.
    pub fn handle(&self) -> Option<ProcessHandle> {
        self.handle
    }

    pub fn last_exit_status(&self) -> Option<ExitStatus> {
        self.last_exit_status
    }

    /// True while the domain is persistent and not stopped by an operator.
    pub fn restart_on_exit(&self) -> bool {
        self.restart_on_exit
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Automatic restarts performed after unexpected exits.
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn snapshot(&self, service_name: &str) -> ProcessSnapshot {
        ProcessSnapshot {
            domain: self.domain().to_string(),
            state: self.state,
            pid: self.handle.map(|h| h.pid()),
            persistent: self.descriptor.persistent,
            on_demand: self.descriptor.on_demand,
            hidden: self.descriptor.hidden,
            restart_on_exit: self.restart_on_exit,
            last_exit_status: self.last_exit_status,
            restart_count: self.restart_count,
            catalog_name: qualified_name(service_name, self.domain()),
        }
    }

    fn invalid(&self, operation: &'static str) -> SupervisorError {
        SupervisorError::InvalidState {
            domain: self.domain().to_string(),
            state: self.state,
            operation,
        }
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            ProcessState::Starting | ProcessState::Running | ProcessState::Suspended
        )
    }

    // ------------------------------------------------------------------
    // Descriptor changes
    // ------------------------------------------------------------------

    pub(crate) fn replace_descriptor(&mut self, descriptor: Arc<ProcessDescriptor>) {
        self.restart_on_exit = descriptor.persistent && self.is_live();
        self.descriptor = descriptor;
        self.detached = false;
    }

    pub(crate) fn set_persistent(&mut self, persistent: bool) {
        if self.descriptor.persistent != persistent {
            let mut descriptor = (*self.descriptor).clone();
            descriptor.persistent = persistent;
            self.descriptor = Arc::new(descriptor);
        }
        self.restart_on_exit = persistent && self.is_live();
    }

    /// Flag the record non-persistent and stop saving it, leaving it running.
    pub(crate) fn detach(&mut self) {
        self.set_persistent(false);
        self.detached = true;
    }

    // ------------------------------------------------------------------
    // Lifecycle transitions
    // ------------------------------------------------------------------

    /// `Stopped -> Starting`.
    pub(crate) fn begin_start(&mut self) -> Result<()> {
        match self.state {
            ProcessState::Stopped => {
                self.state = ProcessState::Starting;
                Ok(())
            }
            ProcessState::Starting | ProcessState::Running | ProcessState::Suspended => {
                Err(SupervisorError::AlreadyRunning {
                    domain: self.domain().to_string(),
                })
            }
            ProcessState::Stopping => Err(self.invalid("start")),
        }
    }

    /// `Starting -> Running` once the spawn is confirmed.
    pub(crate) fn confirm_running(&mut self, handle: ProcessHandle) {
        debug_assert_eq!(self.state, ProcessState::Starting);
        self.state = ProcessState::Running;
        self.handle = Some(handle);
        self.restart_on_exit = self.descriptor.persistent;
    }

    /// `Starting -> Stopped` after a failed spawn.
    pub(crate) fn abort_start(&mut self) {
        self.state = ProcessState::Stopped;
        self.handle = None;
    }

    /// `Running | Suspended -> Stopping`.
    ///
    /// Returns the handle to signal and whether the process is paused and
    /// needs a continue signal to act on the termination request.
    pub(crate) fn begin_stop(&mut self, suppress_restart: bool) -> Result<(ProcessHandle, bool)> {
        let was_suspended = match self.state {
            ProcessState::Running => false,
            ProcessState::Suspended => true,
            ProcessState::Stopped => {
                return Err(SupervisorError::NotRunning {
                    domain: self.domain().to_string(),
                })
            }
            ProcessState::Starting | ProcessState::Stopping => return Err(self.invalid("stop")),
        };
        let handle = self.handle.ok_or_else(|| self.invalid("stop"))?;

        self.state = ProcessState::Stopping;
        if suppress_restart {
            self.restart_on_exit = false;
        }
        Ok((handle, was_suspended))
    }

    /// Handle of a running process that may be paused.
    pub(crate) fn suspendable_handle(&self) -> Result<ProcessHandle> {
        match self.state {
            ProcessState::Running => self.handle.ok_or_else(|| self.invalid("suspend")),
            ProcessState::Stopped => Err(SupervisorError::NotRunning {
                domain: self.domain().to_string(),
            }),
            _ => Err(self.invalid("suspend")),
        }
    }

    /// Handle of a paused process that may be continued.
    pub(crate) fn resumable_handle(&self) -> Result<ProcessHandle> {
        match self.state {
            ProcessState::Suspended => self.handle.ok_or_else(|| self.invalid("resume")),
            ProcessState::Running => Err(SupervisorError::AlreadyRunning {
                domain: self.domain().to_string(),
            }),
            ProcessState::Stopped => Err(SupervisorError::NotRunning {
                domain: self.domain().to_string(),
            }),
            _ => Err(self.invalid("resume")),
        }
    }

    pub(crate) fn mark_suspended(&mut self) {
        self.state = ProcessState::Suspended;
    }

    pub(crate) fn mark_resumed(&mut self) {
        self.state = ProcessState::Running;
    }

    /// Any state with a process -> `Stopped`.
    ///
    /// Returns true when the exit was requested (the record was `Stopping`).
    pub(crate) fn record_exit(&mut self, status: ExitStatus) -> bool {
        let requested = self.state == ProcessState::Stopping;
        self.state = ProcessState::Stopped;
        self.handle = None;
        self.last_exit_status = Some(status);
        requested
    }

    pub(crate) fn note_restart(&mut self) {
        self.restart_count += 1;
    }
}
