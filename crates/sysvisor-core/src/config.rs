//! Centralized configuration for the supervisor.
//!
//! Default intervals and timeouts live in [`SupervisorDefaults`]; a running
//! supervisor is configured through a [`SupervisorConfig`] value.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default values for supervisor tunables.
pub struct SupervisorDefaults;

impl SupervisorDefaults {
    /// Well-known name the supervisor registers itself under in the catalog.
    pub const SERVICE_NAME: &'static str = "sysvisor";

    // Timer
    pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

    // Termination
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);
    pub const KILL_GRACE: Duration = Duration::from_secs(1);
    pub const EXIT_POLL_STEP: Duration = Duration::from_millis(50);

    // Files
    pub const CONFIG_FILE_NAME: &'static str = "domains.json";
    pub const SESSION_FILE_EXTENSION: &'static str = "session.json";
    pub const KEEP_CONFIG_BACKUP: bool = true;

    // Operations passed to graceful termination
    pub const LOGOUT_OPERATION: &'static str = "logout";
    pub const SHUTDOWN_OPERATION: &'static str = "shutdown";

    pub const POWER_OFF_PROGRAM: &'static str = "systemctl";
    pub const POWER_OFF_ARGS: &'static [&'static str] = &["poweroff"];

    // Catalog database
    pub const CATALOG_FILE_NAME: &'static str = "catalog.db";
    pub const CATALOG_BUSY_TIMEOUT_MS: u32 = 5000;
}

/// Configuration for one supervisor instance.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Persisted domain list.
    pub config_path: PathBuf,
    /// Domains that were running when the session was last recorded.
    pub session_path: PathBuf,
    /// Interval of the shared monitor / config poll timer.
    pub poll_interval: Duration,
    /// Per-domain wait for a requested exit before escalating to a kill.
    pub stop_timeout: Duration,
    /// Wait after a forced kill before giving up on a domain.
    pub kill_grace: Duration,
    /// Catalog name of the supervisor; domains are namespaced under it.
    pub service_name: String,
    /// Directory receiving per-domain stdout/stderr logs.
    pub log_dir: Option<PathBuf>,
    /// Program and arguments run to power the machine off.
    pub power_off_command: Vec<String>,
}

impl SupervisorConfig {
    /// Create a config with default timings for the given config file.
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        let config_path = config_path.as_ref().to_path_buf();
        let session_path = config_path.with_extension(SupervisorDefaults::SESSION_FILE_EXTENSION);

        Self {
            config_path,
            session_path,
            poll_interval: SupervisorDefaults::POLL_INTERVAL,
            stop_timeout: SupervisorDefaults::STOP_TIMEOUT,
            kill_grace: SupervisorDefaults::KILL_GRACE,
            service_name: SupervisorDefaults::SERVICE_NAME.to_string(),
            log_dir: None,
            power_off_command: std::iter::once(SupervisorDefaults::POWER_OFF_PROGRAM)
                .chain(SupervisorDefaults::POWER_OFF_ARGS.iter().copied())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Set the session file path.
    pub fn with_session_path(mut self, path: impl AsRef<Path>) -> Self {
        self.session_path = path.as_ref().to_path_buf();
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-domain stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the grace period after a forced kill.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Set the catalog service name.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the directory for domain log files.
    pub fn with_log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.log_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the power-off command line (program first).
    pub fn with_power_off_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.power_off_command = command.into_iter().map(Into::into).collect();
        self
    }
}
