use super::{namespace_prefix, Catalog, CatalogEntry};
use crate::error::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Catalog that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: Mutex<BTreeMap<String, CatalogEntry>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, CatalogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl Catalog for MemoryCatalog {
    fn register(&self, name: &str, pid: u32, port: Option<u16>) -> Result<CatalogEntry> {
        let entry = CatalogEntry {
            name: name.to_string(),
            pid,
            port,
            registered_at: Utc::now().to_rfc3339(),
        };
        self.entries().insert(name.to_string(), entry.clone());
        Ok(entry)
    }

    fn unregister(&self, name: &str) -> Result<bool> {
        Ok(self.entries().remove(name).is_some())
    }

    fn lookup(&self, name: &str) -> Result<Option<CatalogEntry>> {
        Ok(self.entries().get(name).cloned())
    }

    fn list_namespace(&self, service: &str) -> Result<Vec<CatalogEntry>> {
        let prefix = namespace_prefix(service);
        Ok(self
            .entries()
            .values()
            .filter(|e| e.name.starts_with(&prefix))
            .cloned()
            .collect())
    }
}
