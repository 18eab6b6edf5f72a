//! Keeps the registry and the on-disk config file consistent.
//!
//! External edits are detected by comparing the file's modification time with
//! the last value this process saw (its own load or save). There is no file
//! locking; the timestamp is the optimistic-concurrency token.

use super::atomic::atomic_write_json;
use super::schema::{decode_config, encode_config, SessionFile};
use crate::config::SupervisorDefaults;
use crate::domain::ProcessDescriptor;
use crate::error::{Result, SupervisorError};
use crate::registry::Registry;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Differences between the registry and a freshly loaded config file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Domains on disk that the registry does not know.
    pub added: Vec<ProcessDescriptor>,
    /// Known domains whose descriptor differs on disk.
    pub changed: Vec<ProcessDescriptor>,
    /// Known domains no longer present on disk.
    pub removed: Vec<String>,
    /// Added domains that must be started right away.
    pub schedule_start: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Loads and saves the domain list and the session file.
#[derive(Debug)]
pub struct ConfigSynchronizer {
    config_path: PathBuf,
    session_path: PathBuf,
    /// Modification time of the config file as of our last load or save.
    last_seen: Option<SystemTime>,
    /// Session set as last written, to skip identical rewrites.
    last_session: Option<BTreeSet<String>>,
    session_frozen: bool,
}

impl ConfigSynchronizer {
    pub fn new(config_path: impl AsRef<Path>, session_path: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            session_path: session_path.as_ref().to_path_buf(),
            last_seen: None,
            last_session: None,
            session_frozen: false,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.config_path)
            .and_then(|m| m.modified())
            .ok()
    }

    /// Read and decode the config file.
    ///
    /// The timestamp is recorded before decoding, so a corrupt file is not
    /// re-read until it is edited again.
    pub fn load(&mut self) -> Result<BTreeMap<String, ProcessDescriptor>> {
        self.last_seen = self.modified();

        let contents = match fs::read_to_string(&self.config_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    "Config file {} does not exist; starting empty",
                    self.config_path.display()
                );
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(SupervisorError::io_with_path(e, &self.config_path)),
        };

        let descriptors = decode_config(&self.config_path, &contents)?;
        info!(
            "Loaded {} domains from {}",
            descriptors.len(),
            self.config_path.display()
        );
        Ok(descriptors)
    }

    /// Whether the file on disk is newer than what we last loaded or saved.
    pub fn check_for_external_change(&self) -> bool {
        match (self.modified(), self.last_seen) {
            (Some(current), Some(seen)) => current > seen,
            (Some(_), None) => true,
            // Deleting the file is not treated as an edit
            (None, _) => false,
        }
    }

    /// Atomically rewrite the config file with `descriptors`.
    pub fn save(&mut self, descriptors: &BTreeMap<String, ProcessDescriptor>) -> Result<()> {
        atomic_write_json(
            &self.config_path,
            &encode_config(descriptors),
            SupervisorDefaults::KEEP_CONFIG_BACKUP,
        )
        .map_err(|e| match e {
            SupervisorError::Io {
                message, source, ..
            } => SupervisorError::ConfigWriteFailed {
                path: self.config_path.clone(),
                message,
                source,
            },
            other => SupervisorError::ConfigWriteFailed {
                path: self.config_path.clone(),
                message: other.to_string(),
                source: None,
            },
        })?;

        self.last_seen = self.modified();
        info!(
            "Saved {} domains to {}",
            descriptors.len(),
            self.config_path.display()
        );
        Ok(())
    }

    /// Domains recorded as running in the session file.
    ///
    /// A missing or unreadable session file yields an empty set.
    pub fn load_session(&mut self) -> BTreeSet<String> {
        let running = match fs::read_to_string(&self.session_path) {
            Ok(contents) => match serde_json::from_str::<SessionFile>(&contents) {
                Ok(session) => session.running,
                Err(e) => {
                    warn!(
                        "Ignoring unreadable session file {}: {}",
                        self.session_path.display(),
                        e
                    );
                    BTreeSet::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                warn!(
                    "Failed to read session file {}: {}",
                    self.session_path.display(),
                    e
                );
                BTreeSet::new()
            }
        };

        self.last_session = Some(running.clone());
        running
    }

    /// Record the running persistent set. Returns true if the file was written.
    pub fn save_session(&mut self, running: &BTreeSet<String>) -> Result<bool> {
        if self.session_frozen || self.last_session.as_ref() == Some(running) {
            return Ok(false);
        }

        let session = SessionFile {
            running: running.clone(),
        };
        atomic_write_json(&self.session_path, &session, false)?;
        debug!("Session now records {} running domains", running.len());
        self.last_session = Some(running.clone());
        Ok(true)
    }

    /// Stop recording the session until [`thaw_session`](Self::thaw_session).
    pub fn freeze_session(&mut self) {
        self.session_frozen = true;
    }

    pub fn thaw_session(&mut self) {
        self.session_frozen = false;
    }

    pub fn is_session_frozen(&self) -> bool {
        self.session_frozen
    }

    /// Compare the registry against descriptors loaded from disk.
    pub fn plan_reconciliation(
        registry: &Registry,
        disk: &BTreeMap<String, ProcessDescriptor>,
    ) -> ReconcilePlan {
        let mut plan = ReconcilePlan::default();

        for (domain, descriptor) in disk {
            match registry.get(domain) {
                None => {
                    if descriptor.starts_eagerly() && descriptor.persistent {
                        plan.schedule_start.push(domain.clone());
                    }
                    plan.added.push(descriptor.clone());
                }
                Some(record) => {
                    if record.is_detached() || **record.descriptor() != *descriptor {
                        plan.changed.push(descriptor.clone());
                    }
                }
            }
        }

        plan.removed = registry
            .all()
            .into_iter()
            .filter(|r| !r.is_detached() && !disk.contains_key(r.domain()))
            .map(|r| r.domain().to_string())
            .collect();

        plan
    }
}
