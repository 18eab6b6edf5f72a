//! Ordered termination of every domain, log-out and power-off.

use super::operations::Termination;
use super::Supervisor;
use crate::config::SupervisorDefaults;
use crate::domain::ProcessState;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of [`Supervisor::gracefully_terminate_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TerminationReport {
    pub operation: String,
    /// Exited within the stop timeout.
    pub stopped: Vec<String>,
    /// Needed a kill after the stop timeout.
    pub forced: Vec<String>,
    /// Survived the kill too; released without confirmation.
    pub failed: Vec<String>,
}

impl TerminationReport {
    pub fn is_clean(&self) -> bool {
        self.forced.is_empty() && self.failed.is_empty()
    }
}

impl Supervisor {
    /// Stop every domain that has a process: non-persistent ones first, then
    /// persistent ones, each group in name order, one at a time.
    ///
    /// Each domain gets the stop timeout, then a kill. A domain that does not
    /// go away is recorded and the sequence moves on. Automatic restarts are
    /// suppressed while it runs and allowed again once it returns, unless a
    /// session end is under way.
    pub async fn gracefully_terminate_all(&self, operation: &str) -> TerminationReport {
        let report = self.terminate_all(operation).await;
        if !self.ending_session.load(Ordering::SeqCst) {
            self.shutting_down.store(false, Ordering::SeqCst);
            self.synchronizer().thaw_session();
        }
        report
    }

    /// Terminate everything and end the session without powering off.
    ///
    /// Restarts stay suppressed and the session file keeps the domains to
    /// bring back until the next [`boot`](Supervisor::boot).
    pub async fn shut_down(&self, operation: &str) -> TerminationReport {
        self.ending_session.store(true, Ordering::SeqCst);
        let report = self.terminate_all(operation).await;
        self.end_session();
        report
    }

    async fn terminate_all(&self, operation: &str) -> TerminationReport {
        info!("Terminating all domains for {}", operation);
        self.shutting_down.store(true, Ordering::SeqCst);

        if let Err(e) = self.flush_config() {
            warn!("Config not saved before {}: {}", operation, e);
        }
        {
            // Record what to bring back, then stop recording: the stops below
            // must not erase it.
            let running = self.registry().session_domains();
            let mut synchronizer = self.synchronizer();
            if let Err(e) = synchronizer.save_session(&running) {
                warn!("Session not saved before {}: {}", operation, e);
            }
            synchronizer.freeze_session();
        }

        let mut report = TerminationReport {
            operation: operation.to_string(),
            ..Default::default()
        };
        for domain in self.termination_order() {
            match self.terminate_one(&domain).await {
                Some(Termination::Graceful) => report.stopped.push(domain),
                Some(Termination::Forced) => report.forced.push(domain),
                Some(Termination::Abandoned) => report.failed.push(domain),
                None => {}
            }
        }

        if report.is_clean() {
            info!(
                "All domains stopped for {} ({} stopped)",
                operation,
                report.stopped.len()
            );
        } else {
            warn!(
                "Domains stopped for {} with {} forced and {} failed",
                operation,
                report.forced.len(),
                report.failed.len()
            );
        }
        report
    }

    fn termination_order(&self) -> Vec<String> {
        let registry = self.registry();
        let (persistent, transient): (Vec<_>, Vec<_>) = registry
            .all()
            .into_iter()
            .filter(|r| r.state().has_process())
            .partition(|r| r.descriptor().persistent);

        transient
            .into_iter()
            .chain(persistent)
            .map(|r| r.domain().to_string())
            .collect()
    }

    /// Stop one domain and wait for it. `None` if it had no process by the
    /// time its lock was acquired.
    async fn terminate_one(&self, domain: &str) -> Option<Termination> {
        let lock = self.domain_lock(domain).ok()?;
        let _guard = lock.lock_owned().await;

        let (handle, was_suspended, signal) = {
            let mut registry = self.registry();
            let record = registry.get_mut(domain).ok()?;
            match record.state() {
                ProcessState::Stopped | ProcessState::Starting => return None,
                ProcessState::Stopping => (record.handle()?, false, false),
                ProcessState::Running | ProcessState::Suspended => {
                    let (handle, was_suspended) = record.begin_stop(true).ok()?;
                    (handle, was_suspended, true)
                }
            }
        };

        info!("Stopping {} (PID {})", domain, handle.pid());
        if signal {
            if let Err(e) = self.request_termination(domain, handle, was_suspended) {
                warn!("{}: termination request failed: {}", domain, e);
            }
        }
        Some(self.await_termination(domain, handle).await)
    }

    /// Terminate everything for log-out, then optionally power off.
    ///
    /// Returns immediately; the work runs on a background task. Completion is
    /// signalled through [`session_ended`](Supervisor::session_ended).
    pub fn log_out_and_power_off(self: &Arc<Self>, power_off: bool) {
        let supervisor = Arc::clone(self);
        supervisor.ending_session.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            let report = supervisor
                .terminate_all(SupervisorDefaults::LOGOUT_OPERATION)
                .await;
            if !report.is_clean() {
                warn!(
                    "Log-out continued past {} unresponsive domains",
                    report.forced.len() + report.failed.len()
                );
            }

            if power_off {
                if let Err(e) = supervisor.power_control.power_off().await {
                    error!("Power-off failed: {}", e);
                }
            }

            supervisor.end_session();
        });
    }

    fn end_session(&self) {
        info!("Session ended");
        self.session_ended.send_replace(true);
    }

    /// Resolves once a log-out or [`shut_down`](Supervisor::shut_down) has
    /// finished.
    pub async fn session_ended(&self) {
        let mut receiver = self.session_ended.subscribe();
        let _ = receiver.wait_for(|ended| *ended).await;
    }
}
