//! Per-domain lifecycle operations: start, stop, restart, suspend, resume.

use super::Supervisor;
use crate::config::SupervisorDefaults;
use crate::domain::ProcessState;
use crate::error::{Result, SupervisorError};
use crate::process::{ExitStatus, ProcessHandle, ProcessSignal};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { pid: u32 },
    /// The domain already had a live process; nothing was done.
    AlreadyRunning,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    /// Termination was requested; the Monitor finalizes `Stopped`.
    Stopping,
    /// The domain was already stopped.
    NotRunning,
}

/// How a domain ended when the supervisor waited for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    Graceful,
    Forced,
    /// Still alive after the kill grace period; the record was released anyway.
    Abandoned,
}

/// A process the Monitor found gone.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReapedExit {
    pub(crate) status: ExitStatus,
    pub(crate) requested: bool,
    pub(crate) restart_on_exit: bool,
}

impl Supervisor {
    /// Start a domain's process.
    ///
    /// A domain that already has a process yields
    /// [`StartOutcome::AlreadyRunning`].
    pub async fn start(&self, domain: &str) -> Result<StartOutcome> {
        let lock = self.domain_lock(domain)?;
        let _guard = lock.lock_owned().await;
        self.start_locked(domain)
    }

    /// Request termination of a domain's process.
    ///
    /// Clears `restart_on_exit` so the Monitor does not bring it back. The
    /// record stays `Stopping` until the Monitor observes the exit.
    pub async fn stop(&self, domain: &str) -> Result<StopOutcome> {
        let lock = self.domain_lock(domain)?;
        let _guard = lock.lock_owned().await;

        let (handle, was_suspended) = {
            let mut registry = self.registry();
            let record = registry.get_mut(domain)?;
            match record.state() {
                ProcessState::Stopped => return Ok(StopOutcome::NotRunning),
                ProcessState::Stopping => return Ok(StopOutcome::Stopping),
                _ => record.begin_stop(true)?,
            }
        };

        info!("Stopping {} (PID {})", domain, handle.pid());
        self.request_termination(domain, handle, was_suspended)?;
        Ok(StopOutcome::Stopping)
    }

    /// Stop and start again as one operation.
    ///
    /// Waits for the old process (escalating to a kill after the stop
    /// timeout) while holding the domain lock, so the Monitor never sees the
    /// domain in between. `restart_on_exit` is left as it was.
    pub async fn restart(&self, domain: &str) -> Result<StartOutcome> {
        let lock = self.domain_lock(domain)?;
        let _guard = lock.lock_owned().await;

        let pending = {
            let mut registry = self.registry();
            let record = registry.get_mut(domain)?;
            match record.state() {
                ProcessState::Stopped => None,
                // Already asked to exit; just wait for it
                ProcessState::Stopping => record.handle().map(|h| (h, false, false)),
                _ => {
                    let (handle, was_suspended) = record.begin_stop(false)?;
                    Some((handle, was_suspended, true))
                }
            }
        };

        if let Some((handle, was_suspended, signal)) = pending {
            info!("Restarting {} (PID {})", domain, handle.pid());
            if signal {
                self.request_termination(domain, handle, was_suspended)?;
            }
            if self.await_termination(domain, handle).await == Termination::Abandoned {
                warn!("{}: old process did not die; starting anyway", domain);
            }
        }

        self.start_locked(domain)
    }

    /// Pause a running domain.
    pub async fn suspend(&self, domain: &str) -> Result<()> {
        let lock = self.domain_lock(domain)?;
        let _guard = lock.lock_owned().await;

        let handle = self.registry().get_mut(domain)?.suspendable_handle()?;
        self.process_control()
            .signal(&handle, ProcessSignal::Pause)?;
        self.registry().get_mut(domain)?.mark_suspended();
        info!("Suspended {} (PID {})", domain, handle.pid());
        Ok(())
    }

    /// Continue a suspended domain.
    pub async fn resume(&self, domain: &str) -> Result<()> {
        let lock = self.domain_lock(domain)?;
        let _guard = lock.lock_owned().await;

        let handle = self.registry().get_mut(domain)?.resumable_handle()?;
        self.process_control()
            .signal(&handle, ProcessSignal::Resume)?;
        self.registry().get_mut(domain)?.mark_resumed();
        info!("Resumed {} (PID {})", domain, handle.pid());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared paths; callers hold the domain lock
    // ------------------------------------------------------------------

    /// `Stopped -> Starting -> Running`, or back to `Stopped` on failure.
    pub(crate) fn start_locked(&self, domain: &str) -> Result<StartOutcome> {
        let descriptor = {
            let mut registry = self.registry();
            let record = registry.get_mut(domain)?;
            match record.begin_start() {
                Ok(()) => record.descriptor().clone(),
                Err(SupervisorError::AlreadyRunning { .. }) => {
                    return Ok(StartOutcome::AlreadyRunning)
                }
                Err(e) => return Err(e),
            }
        };

        match self.process_control().spawn(&descriptor) {
            Ok(handle) => {
                self.registry().get_mut(domain)?.confirm_running(handle);
                info!("{} is running (PID {})", domain, handle.pid());
                self.publish(domain, handle.pid());
                Ok(StartOutcome::Started { pid: handle.pid() })
            }
            Err(e) => {
                self.registry().get_mut(domain)?.abort_start();
                error!("Failed to start {}: {}", domain, e);
                Err(e)
            }
        }
    }

    /// Send the termination request, continuing a paused process so it can
    /// act on it.
    pub(crate) fn request_termination(
        &self,
        domain: &str,
        handle: ProcessHandle,
        was_suspended: bool,
    ) -> Result<()> {
        let control = self.process_control();
        control.signal(&handle, ProcessSignal::Terminate).map_err(|e| {
            error!("Failed to terminate {}: {}", domain, e);
            e
        })?;
        if was_suspended {
            control.signal(&handle, ProcessSignal::Resume)?;
        }
        Ok(())
    }

    /// Poll until the process is gone or `timeout` elapses.
    pub(crate) async fn await_exit(
        &self,
        handle: &ProcessHandle,
        timeout: Duration,
    ) -> Option<ExitStatus> {
        let control = self.process_control();
        let deadline = Instant::now() + timeout;
        loop {
            if !control.is_alive(handle) {
                return Some(control.exit_status(handle).unwrap_or_else(ExitStatus::unknown));
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(SupervisorDefaults::EXIT_POLL_STEP).await;
        }
    }

    /// Wait for a `Stopping` domain to exit, killing it after the stop
    /// timeout, and finalize the record as `Stopped`.
    pub(crate) async fn await_termination(
        &self,
        domain: &str,
        handle: ProcessHandle,
    ) -> Termination {
        if let Some(status) = self.await_exit(&handle, self.config.stop_timeout).await {
            info!("{} exited: {}", domain, status);
            self.finalize_exit(domain, status);
            return Termination::Graceful;
        }

        warn!(
            "{} did not exit within {:?}; killing PID {}",
            domain,
            self.config.stop_timeout,
            handle.pid()
        );
        if let Err(e) = self.process_control().signal(&handle, ProcessSignal::Kill) {
            warn!("Failed to kill {}: {}", domain, e);
        }

        match self.await_exit(&handle, self.config.kill_grace).await {
            Some(status) => {
                info!("{} killed: {}", domain, status);
                self.finalize_exit(domain, status);
                Termination::Forced
            }
            None => {
                error!(
                    "{} (PID {}) survived a kill; releasing the record",
                    domain,
                    handle.pid()
                );
                self.process_control().release(&handle);
                self.finalize_exit(domain, ExitStatus::unknown());
                Termination::Abandoned
            }
        }
    }

    /// Record the exit and withdraw the catalog entry.
    fn finalize_exit(&self, domain: &str, status: ExitStatus) -> Option<ReapedExit> {
        let reaped = {
            let mut registry = self.registry();
            let record = registry.get_mut(domain).ok()?;
            let requested = record.record_exit(status);
            ReapedExit {
                status,
                requested,
                restart_on_exit: record.restart_on_exit(),
            }
        };
        self.unpublish(domain);
        Some(reaped)
    }

    pub(crate) fn note_restart(&self, domain: &str) {
        if let Ok(record) = self.registry().get_mut(domain) {
            record.note_restart();
        }
    }

    /// Finalize the record if its process is gone.
    pub(crate) fn reap_locked(&self, domain: &str) -> Option<ReapedExit> {
        let handle = {
            let registry = self.registry();
            let record = registry.get(domain)?;
            if !record.state().has_process() {
                return None;
            }
            record.handle()?
        };

        let control = self.process_control();
        if control.is_alive(&handle) {
            return None;
        }
        let status = control
            .exit_status(&handle)
            .unwrap_or_else(ExitStatus::unknown);
        self.finalize_exit(domain, status)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::catalog::Catalog;
    use crate::domain::ProcessDescriptor;

    #[tokio::test]
    async fn test_start_then_stop_ends_stopped_without_restart() {
        let h = harness();
        register(&h, ProcessDescriptor::new("svc", "/bin/svc").persistent(true));

        let outcome = h.supervisor.start("svc").await.unwrap();
        assert!(matches!(outcome, StartOutcome::Started { .. }));
        assert_eq!(h.supervisor.status("svc").unwrap().state, ProcessState::Running);

        assert_eq!(h.supervisor.stop("svc").await.unwrap(), StopOutcome::Stopping);
        h.supervisor.tick().await;

        let status = h.supervisor.status("svc").unwrap();
        assert_eq!(status.state, ProcessState::Stopped);
        assert!(!status.restart_on_exit);
        assert_eq!(h.processes.spawn_count("svc"), 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let h = harness();
        register(&h, ProcessDescriptor::new("svc", "/bin/svc"));

        h.supervisor.start("svc").await.unwrap();
        assert_eq!(
            h.supervisor.start("svc").await.unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(h.processes.spawn_count("svc"), 1);
        assert_eq!(h.processes.live_count("svc"), 1);
    }

    #[tokio::test]
    async fn test_start_unknown_domain() {
        let h = harness();
        assert!(matches!(
            h.supervisor.start("ghost").await,
            Err(SupervisorError::UnknownDomain { .. })
        ));
    }

    #[tokio::test]
    async fn test_launch_failure_returns_to_stopped() {
        let h = harness();
        register(&h, ProcessDescriptor::new("broken", "/missing"));
        h.processes.fail_launches_of("broken");

        let err = h.supervisor.start("broken").await.unwrap_err();
        assert!(matches!(err, SupervisorError::LaunchFailed { .. }));
        assert_eq!(
            h.supervisor.status("broken").unwrap().state,
            ProcessState::Stopped
        );
    }

    #[tokio::test]
    async fn test_stop_of_stopped_domain_is_benign() {
        let h = harness();
        register(&h, ProcessDescriptor::new("svc", "/bin/svc"));
        assert_eq!(h.supervisor.stop("svc").await.unwrap(), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_stop_twice_does_not_resignal() {
        let h = harness();
        register(&h, ProcessDescriptor::new("svc", "/bin/svc"));
        h.processes.ignore_terminate_of("svc");
        h.supervisor.start("svc").await.unwrap();

        h.supervisor.stop("svc").await.unwrap();
        assert_eq!(h.supervisor.stop("svc").await.unwrap(), StopOutcome::Stopping);

        let terminates = h
            .processes
            .events()
            .iter()
            .filter(|e| e.as_str() == "signal:svc:Terminate")
            .count();
        assert_eq!(terminates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_preserves_restart_on_exit() {
        let h = harness();
        register(&h, ProcessDescriptor::new("svc", "/bin/svc").persistent(true));
        let first = h.supervisor.start("svc").await.unwrap();

        let second = h.supervisor.restart("svc").await.unwrap();
        assert_ne!(first, second);

        let status = h.supervisor.status("svc").unwrap();
        assert_eq!(status.state, ProcessState::Running);
        assert!(status.restart_on_exit);
        assert_eq!(h.processes.spawn_count("svc"), 2);
        assert_eq!(h.processes.live_count("svc"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_escalates_to_kill() {
        let h = harness();
        register(&h, ProcessDescriptor::new("stubborn", "/bin/stubborn"));
        h.processes.ignore_terminate_of("stubborn");
        h.supervisor.start("stubborn").await.unwrap();

        h.supervisor.restart("stubborn").await.unwrap();

        let events = h.processes.events();
        assert!(events.contains(&"signal:stubborn:Kill".to_string()));
        assert_eq!(h.processes.live_count("stubborn"), 1);
    }

    #[tokio::test]
    async fn test_restart_of_stopped_domain_starts_it() {
        let h = harness();
        register(&h, ProcessDescriptor::new("svc", "/bin/svc"));
        assert!(matches!(
            h.supervisor.restart("svc").await.unwrap(),
            StartOutcome::Started { .. }
        ));
    }

    #[tokio::test]
    async fn test_suspend_and_resume() {
        let h = harness();
        register(&h, ProcessDescriptor::new("svc", "/bin/svc"));

        assert!(matches!(
            h.supervisor.suspend("svc").await,
            Err(SupervisorError::NotRunning { .. })
        ));

        h.supervisor.start("svc").await.unwrap();
        h.supervisor.suspend("svc").await.unwrap();
        assert_eq!(
            h.supervisor.status("svc").unwrap().state,
            ProcessState::Suspended
        );
        assert!(matches!(
            h.supervisor.suspend("svc").await,
            Err(SupervisorError::InvalidState { .. })
        ));

        h.supervisor.resume("svc").await.unwrap();
        assert_eq!(h.supervisor.status("svc").unwrap().state, ProcessState::Running);
        assert!(matches!(
            h.supervisor.resume("svc").await,
            Err(SupervisorError::AlreadyRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_suspended_domain_continues_it() {
        let h = harness();
        register(&h, ProcessDescriptor::new("svc", "/bin/svc"));
        h.supervisor.start("svc").await.unwrap();
        h.supervisor.suspend("svc").await.unwrap();

        h.supervisor.stop("svc").await.unwrap();

        let events = h.processes.events();
        let tail = &events[events.len() - 2..];
        assert_eq!(tail, ["signal:svc:Terminate", "signal:svc:Resume"]);
    }

    #[tokio::test]
    async fn test_running_domains_are_published() {
        let h = harness();
        register(&h, ProcessDescriptor::new("svc", "/bin/svc"));

        let StartOutcome::Started { pid } = h.supervisor.start("svc").await.unwrap() else {
            panic!("expected a fresh start");
        };
        let entry = h.catalog.lookup("sysvisor/svc").unwrap().unwrap();
        assert_eq!(entry.pid, pid);

        h.supervisor.stop("svc").await.unwrap();
        h.supervisor.tick().await;
        assert!(h.catalog.lookup("sysvisor/svc").unwrap().is_none());
    }
}
