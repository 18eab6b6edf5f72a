//! The supervisor: owns the registry and mediates every mutation of it.
//!
//! Locking:
//! - `registry` and `synchronizer` are plain mutexes guarding in-memory
//!   state; they are never held across an `.await` or a process call.
//! - Each domain has its own async mutex. Operations on a domain hold it for
//!   their whole duration (a restart holds it across the wait for the old
//!   process), so the Monitor and an operator never interleave transitions
//!   on the same record. The Monitor only `try_lock`s and skips busy domains.

mod operations;
mod shutdown;
mod timer;

pub use operations::{StartOutcome, StopOutcome};
pub use shutdown::TerminationReport;
pub use timer::{BootReport, SupervisorHandle, TickReport};

use crate::catalog::{qualified_name, Catalog};
use crate::config::SupervisorConfig;
use crate::domain::{ProcessDescriptor, ProcessSnapshot};
use crate::error::{Result, SupervisorError};
use crate::power::{CommandPowerControl, PowerControl};
use crate::process::{NativeProcessControl, ProcessControl};
use crate::registry::Registry;
use crate::sync::{validate_domain_name, ConfigSynchronizer};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

type DomainLock = Arc<tokio::sync::Mutex<()>>;

/// Builds a [`Supervisor`], loading the config file on the way.
pub struct SupervisorBuilder {
    config: SupervisorConfig,
    process_control: Option<Arc<dyn ProcessControl>>,
    power_control: Option<Arc<dyn PowerControl>>,
    catalog: Option<Arc<dyn Catalog>>,
}

impl SupervisorBuilder {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            process_control: None,
            power_control: None,
            catalog: None,
        }
    }

    /// Process primitive (default: [`NativeProcessControl`]).
    pub fn process_control(mut self, control: Arc<dyn ProcessControl>) -> Self {
        self.process_control = Some(control);
        self
    }

    /// Power-off collaborator (default: the configured command).
    pub fn power_control(mut self, control: Arc<dyn PowerControl>) -> Self {
        self.power_control = Some(control);
        self
    }

    /// Catalog running domains are published in (default: none).
    pub fn catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Create the supervisor and load the persisted domains.
    ///
    /// An unreadable or corrupt config file is reported and the supervisor
    /// starts with no domains; it is picked up once the file is fixed.
    pub fn build(self) -> Result<Arc<Supervisor>> {
        if self.config.poll_interval.is_zero() {
            return Err(SupervisorError::InvalidParams {
                message: "poll interval must be greater than zero".to_string(),
            });
        }

        let process_control = match self.process_control {
            Some(control) => control,
            None => {
                let mut native = NativeProcessControl::new();
                if let Some(ref log_dir) = self.config.log_dir {
                    native = native.with_log_dir(log_dir);
                }
                Arc::new(native)
            }
        };
        let power_control = match self.power_control {
            Some(control) => control,
            None => Arc::new(CommandPowerControl::from_command_line(
                &self.config.power_off_command,
            )?),
        };

        let mut synchronizer =
            ConfigSynchronizer::new(&self.config.config_path, &self.config.session_path);
        let mut registry = Registry::new();
        match synchronizer.load() {
            Ok(descriptors) => {
                for descriptor in descriptors.into_values() {
                    registry.upsert_from_disk(descriptor);
                }
            }
            Err(e) => warn!("Starting without persisted domains: {}", e),
        }

        let (session_ended, _) = watch::channel(false);

        info!(
            "Supervisor {} created with {} domains",
            self.config.service_name,
            registry.len()
        );

        Ok(Arc::new(Supervisor {
            config: self.config,
            registry: Mutex::new(registry),
            synchronizer: Mutex::new(synchronizer),
            process_control,
            power_control,
            catalog: self.catalog,
            domain_locks: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            ending_session: AtomicBool::new(false),
            session_ended,
            deferred_starts: Mutex::new(BTreeSet::new()),
        }))
    }
}

/// User-space process supervisor.
pub struct Supervisor {
    config: SupervisorConfig,
    registry: Mutex<Registry>,
    synchronizer: Mutex<ConfigSynchronizer>,
    process_control: Arc<dyn ProcessControl>,
    power_control: Arc<dyn PowerControl>,
    catalog: Option<Arc<dyn Catalog>>,
    domain_locks: Mutex<HashMap<String, DomainLock>>,
    /// Set by graceful termination; suppresses automatic restarts.
    shutting_down: AtomicBool,
    /// Set once a log-out or shut-down begins; cleared only by boot.
    ending_session: AtomicBool,
    session_ended: watch::Sender<bool>,
    /// Config-scheduled starts whose domain was busy on the last tick.
    deferred_starts: Mutex<BTreeSet<String>>,
}

impl Supervisor {
    pub fn builder(config: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(config)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn synchronizer(&self) -> MutexGuard<'_, ConfigSynchronizer> {
        self.synchronizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn process_control(&self) -> &dyn ProcessControl {
        self.process_control.as_ref()
    }

    /// The mutation lock of a known domain.
    pub(crate) fn domain_lock(&self, domain: &str) -> Result<DomainLock> {
        if !self.registry().contains(domain) {
            return Err(SupervisorError::unknown(domain));
        }
        let mut locks = self
            .domain_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(locks.entry(domain.to_string()).or_default().clone())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Snapshot of one domain.
    pub fn status(&self, domain: &str) -> Result<ProcessSnapshot> {
        self.registry()
            .get(domain)
            .map(|r| r.snapshot(&self.config.service_name))
            .ok_or_else(|| SupervisorError::unknown(domain))
    }

    /// Every domain not flagged hidden, ordered by name.
    pub fn processes(&self) -> Vec<ProcessSnapshot> {
        self.registry()
            .all()
            .into_iter()
            .filter(|r| !r.descriptor().hidden)
            .map(|r| r.snapshot(&self.config.service_name))
            .collect()
    }

    /// Every domain, hidden ones included.
    pub fn all_processes(&self) -> Vec<ProcessSnapshot> {
        self.registry()
            .all()
            .into_iter()
            .map(|r| r.snapshot(&self.config.service_name))
            .collect()
    }

    /// Domains flagged hidden, in any state.
    pub fn hidden_processes(&self) -> Vec<ProcessSnapshot> {
        self.registry()
            .hidden()
            .into_iter()
            .map(|r| r.snapshot(&self.config.service_name))
            .collect()
    }

    // ------------------------------------------------------------------
    // Registry mutations
    // ------------------------------------------------------------------

    /// Add a domain or replace its descriptor.
    ///
    /// A running process keeps running; the new descriptor applies from its
    /// next start. Returns true if the domain was new.
    pub fn register_domain(&self, descriptor: ProcessDescriptor) -> Result<bool> {
        validate_domain_name(&descriptor.domain)
            .map_err(|message| SupervisorError::InvalidParams { message })?;
        if descriptor.launch_path.as_os_str().is_empty() {
            return Err(SupervisorError::InvalidParams {
                message: format!("{}: launch path is empty", descriptor.domain),
            });
        }

        let domain = descriptor.domain.clone();
        let added = self.registry().upsert(descriptor);
        if added {
            info!("Registered domain {}", domain);
        } else {
            info!("Updated descriptor of {}", domain);
        }
        Ok(added)
    }

    /// Delete a stopped domain.
    pub async fn remove_domain(&self, domain: &str) -> Result<()> {
        let lock = self.domain_lock(domain)?;
        let _guard = lock.lock_owned().await;

        self.registry().remove(domain)?;
        self.domain_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(domain);
        info!("Removed domain {}", domain);
        Ok(())
    }

    /// Flip the persistence flag of a domain.
    pub fn set_persistent(&self, domain: &str, persistent: bool) -> Result<()> {
        self.registry().set_persistent(domain, persistent)?;
        info!("{} is now {}", domain, if persistent { "persistent" } else { "transient" });
        Ok(())
    }

    /// Save the config file if the persisted set changed since the last save.
    ///
    /// A failed save is logged and retried on the next call.
    pub fn flush_config(&self) -> Result<bool> {
        let descriptors = {
            let mut registry = self.registry();
            if !registry.take_dirty() {
                return Ok(false);
            }
            registry.persisted_descriptors()
        };

        let saved = self.synchronizer().save(&descriptors);
        if let Err(e) = saved {
            warn!("{}; will retry", e);
            self.registry().mark_dirty();
            return Err(e);
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    pub(crate) fn publish(&self, domain: &str, pid: u32) {
        let Some(ref catalog) = self.catalog else {
            return;
        };
        let name = qualified_name(&self.config.service_name, domain);
        match catalog.register(&name, pid, None) {
            Ok(_) => debug!("Published {}", name),
            Err(e) => warn!("Failed to publish {}: {}", name, e),
        }
    }

    pub(crate) fn unpublish(&self, domain: &str) {
        let Some(ref catalog) = self.catalog else {
            return;
        };
        let name = qualified_name(&self.config.service_name, domain);
        if let Err(e) = catalog.unregister(&name) {
            warn!("Failed to withdraw {}: {}", name, e);
        }
    }
}
