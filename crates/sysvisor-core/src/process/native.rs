//! Process control backed by `std::process` and platform signals.

use super::control::{ExitStatus, ProcessControl, ProcessHandle, ProcessSignal};
use crate::domain::ProcessDescriptor;
use crate::error::{Result, SupervisorError};
use crate::platform;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Spawns domains as direct children and reaps them with `try_wait`.
#[derive(Debug, Default)]
pub struct NativeProcessControl {
    /// Children not yet reaped, by PID.
    children: Mutex<HashMap<u32, Child>>,
    /// Exit statuses of reaped children, until collected.
    exits: Mutex<HashMap<u32, ExitStatus>>,
    /// Directory for per-domain stdout/stderr logs.
    log_dir: Option<PathBuf>,
}

impl NativeProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redirect each domain's output to `<log_dir>/<domain>.log`.
    pub fn with_log_dir(mut self, log_dir: impl AsRef<Path>) -> Self {
        self.log_dir = Some(log_dir.as_ref().to_path_buf());
        self
    }

    fn children(&self) -> MutexGuard<'_, HashMap<u32, Child>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exits(&self) -> MutexGuard<'_, HashMap<u32, ExitStatus>> {
        self.exits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn launch_failed(descriptor: &ProcessDescriptor, message: impl Into<String>) -> SupervisorError {
        SupervisorError::LaunchFailed {
            domain: descriptor.domain.clone(),
            message: message.into(),
        }
    }

    fn configure_stdio(&self, cmd: &mut Command, descriptor: &ProcessDescriptor) -> Result<()> {
        cmd.stdin(Stdio::null());

        let Some(ref log_dir) = self.log_dir else {
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
            return Ok(());
        };

        fs::create_dir_all(log_dir).map_err(|e| SupervisorError::io_with_path(e, log_dir))?;
        let log_file = log_dir.join(format!("{}.log", descriptor.domain));
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .map_err(|e| SupervisorError::Io {
                message: "open domain log file".to_string(),
                path: Some(log_file.clone()),
                source: Some(e),
            })?;
        let stdout_file = file.try_clone().map_err(|e| SupervisorError::Io {
            message: "clone domain log file handle".to_string(),
            path: Some(log_file.clone()),
            source: Some(e),
        })?;
        cmd.stdout(Stdio::from(stdout_file));
        cmd.stderr(Stdio::from(file));
        Ok(())
    }

    /// Move a finished child from `children` to `exits`.
    fn reap(&self, pid: u32) -> Option<ExitStatus> {
        let mut children = self.children();
        let child = children.get_mut(&pid)?;
        match child.try_wait() {
            Ok(Some(status)) => {
                children.remove(&pid);
                let status = ExitStatus::from(status);
                debug!("Reaped process {}: {}", pid, status);
                self.exits().insert(pid, status);
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("try_wait({}) failed: {}", pid, e);
                children.remove(&pid);
                self.exits().insert(pid, ExitStatus::unknown());
                Some(ExitStatus::unknown())
            }
        }
    }
}

impl ProcessControl for NativeProcessControl {
    fn spawn(&self, descriptor: &ProcessDescriptor) -> Result<ProcessHandle> {
        if !descriptor.launch_path.exists() {
            return Err(Self::launch_failed(
                descriptor,
                format!("Executable not found: {}", descriptor.launch_path.display()),
            ));
        }

        let mut cmd = Command::new(&descriptor.launch_path);
        cmd.args(&descriptor.arguments);
        self.configure_stdio(&mut cmd, descriptor)
            .map_err(|e| Self::launch_failed(descriptor, e.to_string()))?;

        #[cfg(unix)]
        {
            // Own process group: terminal signals aimed at the supervisor
            // must not reach the domains.
            cmd.process_group(0);

            if let Some(ref identity) = descriptor.identity {
                let (uid, gid) = platform::resolve_identity(identity)
                    .map_err(|e| Self::launch_failed(descriptor, e.to_string()))?;
                cmd.gid(gid).uid(uid);
            }
        }

        #[cfg(not(unix))]
        if let Some(ref identity) = descriptor.identity {
            return Err(Self::launch_failed(
                descriptor,
                format!("Cannot run as {} on this platform", identity),
            ));
        }

        info!(
            "Launching {}: {}",
            descriptor.domain,
            descriptor.command_line()
        );

        let child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn {}: {}", descriptor.domain, e);
            Self::launch_failed(descriptor, format!("Failed to spawn process: {}", e))
        })?;

        let pid = child.id();
        self.children().insert(pid, child);
        info!("Launched {} with PID {}", descriptor.domain, pid);

        Ok(ProcessHandle::from_pid(pid))
    }

    fn signal(&self, handle: &ProcessHandle, signal: ProcessSignal) -> Result<()> {
        #[cfg(not(unix))]
        if matches!(signal, ProcessSignal::Terminate | ProcessSignal::Kill) {
            if let Some(child) = self.children().get_mut(&handle.pid()) {
                return child.kill().map_err(SupervisorError::from);
            }
            return Ok(());
        }

        platform::send_signal(handle.pid(), signal)
    }

    fn is_alive(&self, handle: &ProcessHandle) -> bool {
        let pid = handle.pid();
        if self.children().contains_key(&pid) {
            return self.reap(pid).is_none();
        }
        if self.exits().contains_key(&pid) {
            return false;
        }
        // Not our child (e.g. adopted after a supervisor restart)
        platform::is_process_alive(pid)
    }

    fn exit_status(&self, handle: &ProcessHandle) -> Option<ExitStatus> {
        let pid = handle.pid();
        if let Some(status) = self.exits().remove(&pid) {
            return Some(status);
        }
        self.reap(pid)
            .and_then(|_| self.exits().remove(&pid))
    }

    fn release(&self, handle: &ProcessHandle) {
        let pid = handle.pid();
        if self.children().remove(&pid).is_some() {
            warn!("No longer tracking PID {}; it may still be running", pid);
        }
        self.exits().remove(&pid);
    }
}
