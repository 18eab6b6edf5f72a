//! SQLite-backed catalog shared between processes on one machine.

use super::{namespace_prefix, Catalog, CatalogEntry};
use crate::config::SupervisorDefaults;
use crate::error::{Result, SupervisorError};
use crate::platform;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Catalog stored in a SQLite database.
///
/// Uses WAL mode for safe concurrent access across processes and
/// `Arc<Mutex<Connection>>` for thread safety within a process.
#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalog {
    /// Open the catalog at `db_path`, creating it and its parent directories
    /// if needed.
    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| SupervisorError::Io {
                    message: format!("Failed to create catalog directory: {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database, for tests and single-process setups.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA busy_timeout={};\n\
             PRAGMA synchronous=NORMAL;",
            SupervisorDefaults::CATALOG_BUSY_TIMEOUT_MS,
        ))?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                name TEXT PRIMARY KEY,
                pid INTEGER NOT NULL,
                port INTEGER,
                registered_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SupervisorError::Database {
            message: "Failed to acquire catalog connection lock".to_string(),
            source: None,
        })
    }

    fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
        Ok(CatalogEntry {
            name: row.get(0)?,
            pid: row.get(1)?,
            port: row.get(2)?,
            registered_at: row.get(3)?,
        })
    }

    /// Remove entries whose process is gone. Returns how many were removed.
    pub fn cleanup_stale(&self) -> Result<usize> {
        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare("SELECT name, pid FROM entries")?;
        let entries: Vec<(String, u32)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut removed = 0;
        for (name, pid) in &entries {
            if !platform::is_process_alive(*pid) {
                conn.execute("DELETE FROM entries WHERE name = ?1", params![name])?;
                debug!("Cleaned up stale catalog entry {} (PID {} dead)", name, pid);
                removed += 1;
            }
        }

        Ok(removed)
    }
}

impl Catalog for SqliteCatalog {
    fn register(&self, name: &str, pid: u32, port: Option<u16>) -> Result<CatalogEntry> {
        let conn = self.lock_conn()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO entries (name, pid, port, registered_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                 pid=excluded.pid,
                 port=excluded.port,
                 registered_at=excluded.registered_at",
            params![name, pid, port, now],
        )?;

        debug!("Registered {} (PID {}, port {:?})", name, pid, port);

        Ok(CatalogEntry {
            name: name.to_string(),
            pid,
            port,
            registered_at: now,
        })
    }

    fn unregister(&self, name: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let rows = conn.execute("DELETE FROM entries WHERE name = ?1", params![name])?;
        if rows > 0 {
            debug!("Unregistered {}", name);
        }
        Ok(rows > 0)
    }

    fn lookup(&self, name: &str) -> Result<Option<CatalogEntry>> {
        let conn = self.lock_conn()?;
        let result = conn
            .query_row(
                "SELECT name, pid, port, registered_at FROM entries WHERE name = ?1",
                params![name],
                Self::entry_from_row,
            )
            .optional()?;
        Ok(result)
    }

    fn list_namespace(&self, service: &str) -> Result<Vec<CatalogEntry>> {
        let conn = self.lock_conn()?;
        let prefix = namespace_prefix(service);
        let mut stmt = conn.prepare(
            "SELECT name, pid, port, registered_at FROM entries
             WHERE substr(name, 1, length(?1)) = ?1
             ORDER BY name",
        )?;

        let rows = stmt.query_map(params![prefix], Self::entry_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}
