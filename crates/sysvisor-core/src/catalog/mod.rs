//! Name catalog the supervisor and its domains are published in.
//!
//! The supervisor registers itself under its well-known service name; every
//! running domain is registered as `<service>/<domain>`. Other components
//! resolve those names to a PID (and, for the supervisor, a control port).
//!
//! Two backends:
//! - [`SqliteCatalog`]: shared across processes, WAL mode
//! - [`MemoryCatalog`]: in-process only

mod memory;
mod sqlite;

pub use memory::MemoryCatalog;
pub use sqlite::SqliteCatalog;

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One published name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub pid: u32,
    pub port: Option<u16>,
    /// RFC 3339 timestamp of the (latest) registration.
    pub registered_at: String,
}

/// Registry/catalog service contract.
pub trait Catalog: Send + Sync + 'static {
    /// Publish `name`, replacing any previous entry with the same name.
    fn register(&self, name: &str, pid: u32, port: Option<u16>) -> Result<CatalogEntry>;

    /// Withdraw `name`. Returns false if it was not registered.
    fn unregister(&self, name: &str) -> Result<bool>;

    fn lookup(&self, name: &str) -> Result<Option<CatalogEntry>>;

    /// Entries namespaced under `service`, ordered by name.
    fn list_namespace(&self, service: &str) -> Result<Vec<CatalogEntry>>;
}

/// Externally visible name of a domain.
pub fn qualified_name(service: &str, domain: &str) -> String {
    format!("{}/{}", service, domain)
}

/// Prefix shared by every name under `service`.
pub(crate) fn namespace_prefix(service: &str) -> String {
    format!("{}/", service)
}
