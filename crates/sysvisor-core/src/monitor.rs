//! Liveness pass over every domain that has a process.
//!
//! Runs in domain-name order. A domain whose mutation lock is taken (an
//! operation is in flight) is skipped and looked at again on the next tick.

use crate::process::ExitStatus;
use crate::supervisor::{StartOutcome, Supervisor};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// What one tick observed or did for a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// The process is gone and the record is now `Stopped`.
    Exited {
        domain: String,
        status: ExitStatus,
        requested: bool,
    },
    /// An unexpected exit was followed by a new process.
    Restarted { domain: String, pid: u32 },
    /// An unexpected exit could not be followed by a new process.
    RestartFailed { domain: String, error: String },
}

pub struct Monitor;

impl Monitor {
    /// Check every active domain once.
    pub fn tick(supervisor: &Supervisor) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        let domains = supervisor.registry().active_domains();

        for domain in domains {
            let Ok(lock) = supervisor.domain_lock(&domain) else {
                continue;
            };
            let Ok(_guard) = lock.try_lock_owned() else {
                debug!("Skipping {}: operation in progress", domain);
                continue;
            };

            let Some(exit) = supervisor.reap_locked(&domain) else {
                continue;
            };

            if exit.requested {
                info!("{} stopped: {}", domain, exit.status);
            } else {
                warn!("{} exited unexpectedly: {}", domain, exit.status);
            }
            events.push(MonitorEvent::Exited {
                domain: domain.clone(),
                status: exit.status,
                requested: exit.requested,
            });

            if exit.requested || !exit.restart_on_exit {
                continue;
            }
            if supervisor.is_shutting_down() {
                info!("Not restarting {}: shutting down", domain);
                continue;
            }

            supervisor.note_restart(&domain);
            match supervisor.start_locked(&domain) {
                Ok(StartOutcome::Started { pid }) => {
                    info!("Restarted {} (PID {})", domain, pid);
                    events.push(MonitorEvent::Restarted { domain, pid });
                }
                Ok(StartOutcome::AlreadyRunning) => {}
                Err(e) => {
                    error!("Failed to restart {}: {}", domain, e);
                    events.push(MonitorEvent::RestartFailed {
                        domain,
                        error: e.to_string(),
                    });
                }
            }
        }

        events
    }
}
