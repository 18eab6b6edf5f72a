//! The shared timer: config poll, Monitor pass, debounced saves. Also boot.

use super::Supervisor;
use crate::monitor::{Monitor, MonitorEvent};
use crate::supervisor::StartOutcome;
use crate::sync::ConfigSynchronizer;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What one timer tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// The config file changed on disk and was reconciled.
    pub config_reloaded: bool,
    /// Domains started because a config edit added them.
    pub scheduled_starts: Vec<String>,
    pub events: Vec<MonitorEvent>,
}

/// Domains brought up by [`Supervisor::boot`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootReport {
    pub started: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Handle to the running timer task. Dropping it stops the task.
pub struct SupervisorHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Stop the timer and wait for the current tick to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                error!("Timer task failed: {}", e);
            }
        }
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Supervisor {
    /// Spawn the timer task driving [`tick`](Supervisor::tick) every poll
    /// interval.
    pub fn run(self: Arc<Self>) -> SupervisorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = self.config.poll_interval;

        let task_handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Timer running every {:?}", period);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Timer stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
        });

        SupervisorHandle {
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        }
    }

    /// One pass: reconcile external config edits, check liveness, save what
    /// changed.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        let mut scheduled = std::mem::take(&mut *self.deferred_starts());
        if let Some(from_config) = self.poll_config() {
            report.config_reloaded = true;
            scheduled.extend(from_config);
        }
        for domain in scheduled {
            if self.is_shutting_down() {
                break;
            }
            if self.start_scheduled(&domain) {
                report.scheduled_starts.push(domain);
            }
        }

        report.events = Monitor::tick(self);

        // Errors are logged by flush_config and retried next tick
        let _ = self.flush_config();

        if !self.is_shutting_down() {
            self.record_session();
        }

        report
    }

    /// Start a domain a config edit added, unless an operation holds it.
    ///
    /// A busy domain is retried on the next tick. Returns true if a process
    /// was spawned.
    fn start_scheduled(&self, domain: &str) -> bool {
        let Ok(lock) = self.domain_lock(domain) else {
            debug!("Not starting {}: no longer registered", domain);
            return false;
        };
        let Ok(_guard) = lock.try_lock_owned() else {
            debug!("Deferring start of {}: operation in progress", domain);
            self.deferred_starts().insert(domain.to_string());
            return false;
        };

        match self.start_locked(domain) {
            Ok(StartOutcome::Started { .. }) => true,
            Ok(StartOutcome::AlreadyRunning) => false,
            Err(e) => {
                error!("Failed to start new domain {}: {}", domain, e);
                false
            }
        }
    }

    fn deferred_starts(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.deferred_starts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reload and reconcile the config file if it changed on disk.
    ///
    /// Returns the domains to start, or `None` if nothing was reloaded.
    fn poll_config(&self) -> Option<Vec<String>> {
        let loaded = {
            let mut synchronizer = self.synchronizer();
            if !synchronizer.check_for_external_change() {
                return None;
            }
            info!(
                "Config file {} changed on disk",
                synchronizer.config_path().display()
            );
            synchronizer.load()
        };

        let disk = match loaded {
            Ok(disk) => disk,
            Err(e) => {
                warn!("Keeping current domains: {}", e);
                return None;
            }
        };

        let mut registry = self.registry();
        let plan = ConfigSynchronizer::plan_reconciliation(&registry, &disk);
        if plan.is_empty() {
            debug!("Config file matches the registry");
            return Some(Vec::new());
        }

        for descriptor in plan.added.iter().chain(&plan.changed) {
            registry.upsert_from_disk(descriptor.clone());
        }
        for domain in &plan.removed {
            // Left running; only persistence is dropped
            if let Err(e) = registry.detach(domain) {
                warn!("Failed to detach {}: {}", domain, e);
            }
        }

        info!(
            "Reconciled config: {} added, {} changed, {} removed",
            plan.added.len(),
            plan.changed.len(),
            plan.removed.len()
        );
        Some(plan.schedule_start)
    }

    fn record_session(&self) {
        let running = self.registry().session_domains();
        if let Err(e) = self.synchronizer().save_session(&running) {
            warn!("Failed to record session: {}", e);
        }
    }

    /// Bring up the boot set, in name order: every eager domain, plus the
    /// persistent on-demand domains the last session recorded as running.
    ///
    /// Clears the shutting-down state left by an earlier termination.
    pub async fn boot(&self) -> BootReport {
        self.ending_session.store(false, Ordering::SeqCst);
        self.shutting_down.store(false, Ordering::SeqCst);
        self.session_ended.send_replace(false);

        let session = {
            let mut synchronizer = self.synchronizer();
            synchronizer.thaw_session();
            synchronizer.load_session()
        };

        let boot_set: Vec<String> = self
            .registry()
            .all()
            .into_iter()
            .filter(|r| {
                let descriptor = r.descriptor();
                descriptor.starts_eagerly()
                    || (descriptor.persistent && session.contains(r.domain()))
            })
            .map(|r| r.domain().to_string())
            .collect();

        info!("Booting {} domains", boot_set.len());

        let mut report = BootReport::default();
        for domain in boot_set {
            match self.start(&domain).await {
                Ok(StartOutcome::Started { .. }) => report.started.push(domain),
                Ok(StartOutcome::AlreadyRunning) => {}
                Err(e) => {
                    error!("Boot could not start {}: {}", domain, e);
                    report.failed.push((domain, e.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::domain::{ProcessDescriptor, ProcessState};
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    fn write_config(path: &Path, json: &str) {
        fs::write(path, json).unwrap();
        // Coarse-mtime filesystems would otherwise hide back-to-back edits
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();
    }

    #[tokio::test]
    async fn test_boot_starts_eager_and_session_domains() {
        let h = harness_with_config(Some(
            r#"{
                "eager": {"LaunchPath": "/bin/eager"},
                "lazy": {"LaunchPath": "/bin/lazy", "OnDemand": true},
                "resumed": {"LaunchPath": "/bin/resumed", "OnDemand": true, "Persistent": true},
                "idle": {"LaunchPath": "/bin/idle", "OnDemand": true, "Persistent": true},
                "broken": {"LaunchPath": "/bin/broken"}
            }"#,
        ));
        fs::write(
            h.dir.path().join("domains.session.json"),
            r#"{"running": ["resumed"]}"#,
        )
        .unwrap();
        h.processes.fail_launches_of("broken");

        let report = h.supervisor.boot().await;

        assert_eq!(report.started, vec!["eager", "resumed"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
        assert_eq!(h.supervisor.status("lazy").unwrap().state, ProcessState::Stopped);
        assert_eq!(h.supervisor.status("idle").unwrap().state, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_external_edit_adds_domain_without_disturbing_running() {
        let h = harness_with_config(Some(r#"{"old": {"LaunchPath": "/bin/old"}}"#));
        let config_path = h.dir.path().join("domains.json");
        let first = h.supervisor.start("old").await.unwrap();

        write_config(
            &config_path,
            r#"{
                "old": {"LaunchPath": "/bin/old"},
                "x": {"LaunchPath": "/bin/x", "OnDemand": true}
            }"#,
        );
        let report = h.supervisor.tick().await;

        assert!(report.config_reloaded);
        assert!(report.scheduled_starts.is_empty());
        assert_eq!(h.supervisor.status("x").unwrap().state, ProcessState::Stopped);

        let old = h.supervisor.status("old").unwrap();
        assert_eq!(old.state, ProcessState::Running);
        assert_eq!(StartOutcome::Started { pid: old.pid.unwrap() }, first);
        assert_eq!(h.processes.spawn_count("old"), 1);
    }

    #[tokio::test]
    async fn test_external_edit_schedules_eager_persistent_domain() {
        let h = harness();
        write_config(
            &h.dir.path().join("domains.json"),
            r#"{
                "eager": {"LaunchPath": "/bin/eager", "Persistent": true},
                "plain": {"LaunchPath": "/bin/plain"}
            }"#,
        );

        let report = h.supervisor.tick().await;
        assert_eq!(report.scheduled_starts, vec!["eager"]);
        assert_eq!(h.supervisor.status("eager").unwrap().state, ProcessState::Running);
        assert_eq!(h.supervisor.status("plain").unwrap().state, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_scheduled_start_of_busy_domain_waits_for_next_tick() {
        let h = harness();
        register(&h, ProcessDescriptor::new("eager", "/bin/eager").persistent(true));
        let guard = h.supervisor.domain_lock("eager").unwrap().lock_owned().await;

        assert!(!h.supervisor.start_scheduled("eager"));
        let report = tokio::time::timeout(Duration::from_secs(1), h.supervisor.tick())
            .await
            .unwrap();
        assert!(report.scheduled_starts.is_empty());
        assert_eq!(h.supervisor.status("eager").unwrap().state, ProcessState::Stopped);

        drop(guard);
        let report = h.supervisor.tick().await;
        assert_eq!(report.scheduled_starts, vec!["eager"]);
        assert_eq!(h.supervisor.status("eager").unwrap().state, ProcessState::Running);
        assert_eq!(h.processes.spawn_count("eager"), 1);

        // Nothing left over
        assert!(h.supervisor.tick().await.scheduled_starts.is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_start_of_removed_domain_is_dropped() {
        let h = harness();
        register(&h, ProcessDescriptor::new("gone", "/bin/gone"));
        let guard = h.supervisor.domain_lock("gone").unwrap().lock_owned().await;
        assert!(!h.supervisor.start_scheduled("gone"));
        drop(guard);
        h.supervisor.remove_domain("gone").await.unwrap();

        assert!(h.supervisor.tick().await.scheduled_starts.is_empty());
        assert_eq!(h.processes.spawn_count("gone"), 0);
    }

    #[tokio::test]
    async fn test_removed_domain_keeps_running_as_non_persistent() {
        let h = harness_with_config(Some(
            r#"{"svc": {"LaunchPath": "/bin/svc", "Persistent": true}}"#,
        ));
        h.supervisor.start("svc").await.unwrap();

        write_config(&h.dir.path().join("domains.json"), "{}");
        h.supervisor.tick().await;

        let svc = h.supervisor.status("svc").unwrap();
        assert_eq!(svc.state, ProcessState::Running);
        assert!(!svc.persistent);
        assert!(!svc.restart_on_exit);

        // A crash is no longer followed by a restart
        h.processes
            .simulate_exit("svc", crate::process::ExitStatus::exited(1));
        h.supervisor.tick().await;
        assert_eq!(h.supervisor.status("svc").unwrap().state, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_corrupt_edit_keeps_registry() {
        let h = harness_with_config(Some(r#"{"svc": {"LaunchPath": "/bin/svc"}}"#));
        write_config(&h.dir.path().join("domains.json"), "{ nope");

        let report = h.supervisor.tick().await;
        assert!(!report.config_reloaded);
        assert!(h.supervisor.status("svc").is_ok());
    }

    #[tokio::test]
    async fn test_tick_saves_registry_changes() {
        let h = harness();
        register(&h, ProcessDescriptor::new("new", "/bin/new").persistent(true));
        h.supervisor.tick().await;

        let saved = fs::read_to_string(h.dir.path().join("domains.json")).unwrap();
        assert!(saved.contains("\"new\""));

        // Our own save is not mistaken for an external edit
        assert!(!h.supervisor.tick().await.config_reloaded);
    }

    #[tokio::test]
    async fn test_session_tracks_persistent_running_domains() {
        let h = harness();
        register(&h, ProcessDescriptor::new("keep", "/bin/keep").persistent(true));
        register(&h, ProcessDescriptor::new("temp", "/bin/temp"));
        h.supervisor.start("keep").await.unwrap();
        h.supervisor.start("temp").await.unwrap();
        h.supervisor.tick().await;

        let session_path = h.dir.path().join("domains.session.json");
        let session: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&session_path).unwrap()).unwrap();
        assert_eq!(session["running"], serde_json::json!(["keep"]));

        h.supervisor.stop("keep").await.unwrap();
        h.supervisor.tick().await;
        let session: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&session_path).unwrap()).unwrap();
        assert_eq!(session["running"], serde_json::json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drives_monitor() {
        let h = harness();
        register(&h, ProcessDescriptor::new("svc", "/bin/svc").persistent(true));
        h.supervisor.start("svc").await.unwrap();

        let handle = h.supervisor.clone().run();
        h.processes
            .simulate_exit("svc", crate::process::ExitStatus::exited(2));
        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.shutdown().await;

        assert_eq!(h.supervisor.status("svc").unwrap().restart_count, 1);
        assert_eq!(h.processes.spawn_count("svc"), 2);
    }
}
