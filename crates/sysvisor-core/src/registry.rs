//! Domain registry: the single source of truth for what exists and in which
//! state.
//!
//! Records are kept in a `BTreeMap` so every listing is ordered by domain
//! name. Mutations that change the persisted set raise a dirty flag which the
//! timer consumes to save the config file at most once per tick.

use crate::domain::{ProcessDescriptor, ProcessRecord, ProcessState};
use crate::error::{Result, SupervisorError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Mapping from domain name to runtime record.
#[derive(Debug, Default)]
pub struct Registry {
    records: BTreeMap<String, ProcessRecord>,
    dirty: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, domain: &str) -> Option<&ProcessRecord> {
        self.records.get(domain)
    }

    pub(crate) fn get_mut(&mut self, domain: &str) -> Result<&mut ProcessRecord> {
        self.records
            .get_mut(domain)
            .ok_or_else(|| SupervisorError::unknown(domain))
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.records.contains_key(domain)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace the descriptor of a domain.
    ///
    /// Replacing keeps the runtime state (a running process stays attached);
    /// the new descriptor is used from the next start on. Returns true if
    /// the domain was new.
    pub fn upsert(&mut self, descriptor: ProcessDescriptor) -> bool {
        self.dirty = true;
        self.insert_descriptor(descriptor)
    }

    /// Upsert coming from the config file itself; does not request a save.
    pub(crate) fn upsert_from_disk(&mut self, descriptor: ProcessDescriptor) -> bool {
        self.insert_descriptor(descriptor)
    }

    fn insert_descriptor(&mut self, descriptor: ProcessDescriptor) -> bool {
        let descriptor = Arc::new(descriptor);
        match self.records.get_mut(&descriptor.domain) {
            Some(record) => {
                record.replace_descriptor(descriptor);
                false
            }
            None => {
                self.records
                    .insert(descriptor.domain.clone(), ProcessRecord::new(descriptor));
                true
            }
        }
    }

    /// Delete a stopped domain.
    pub fn remove(&mut self, domain: &str) -> Result<ProcessRecord> {
        let record = self
            .records
            .get(domain)
            .ok_or_else(|| SupervisorError::unknown(domain))?;
        if record.state() != ProcessState::Stopped {
            return Err(SupervisorError::InvalidState {
                domain: domain.to_string(),
                state: record.state(),
                operation: "remove",
            });
        }

        self.dirty = true;
        self.records
            .remove(domain)
            .ok_or_else(|| SupervisorError::unknown(domain))
    }

    pub(crate) fn set_persistent(&mut self, domain: &str, persistent: bool) -> Result<()> {
        self.get_mut(domain)?.set_persistent(persistent);
        self.dirty = true;
        Ok(())
    }

    /// Mark a domain that vanished from the config file.
    pub(crate) fn detach(&mut self, domain: &str) -> Result<()> {
        self.get_mut(domain)?.detach();
        Ok(())
    }

    /// Every record, ordered by domain name.
    pub fn all(&self) -> Vec<&ProcessRecord> {
        self.records.values().collect()
    }

    /// Records flagged hidden, in any state.
    pub fn hidden(&self) -> Vec<&ProcessRecord> {
        self.records
            .values()
            .filter(|r| r.descriptor().hidden)
            .collect()
    }

    /// Domains with a process attached, ordered by name.
    pub fn active_domains(&self) -> Vec<String> {
        self.records
            .values()
            .filter(|r| r.state().has_process())
            .map(|r| r.domain().to_string())
            .collect()
    }

    /// Descriptors written to the config file.
    pub fn persisted_descriptors(&self) -> BTreeMap<String, ProcessDescriptor> {
        self.records
            .values()
            .filter(|r| !r.is_detached())
            .map(|r| (r.domain().to_string(), (**r.descriptor()).clone()))
            .collect()
    }

    /// Persistent domains currently meant to be running.
    pub fn session_domains(&self) -> BTreeSet<String> {
        self.records
            .values()
            .filter(|r| r.restart_on_exit() && r.state().has_process())
            .map(|r| r.domain().to_string())
            .collect()
    }

    /// Consume the pending-save flag.
    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Request another save after a failed one.
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
