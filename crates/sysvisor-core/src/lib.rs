//! Sysvisor Core - user-space process supervisor engine.
//!
//! Starts, stops, suspends and restarts a fixed set of named domains, brings
//! persistent ones back after a supervisor restart, follows edits of its own
//! config file and terminates everything in order on log-out. It has no
//! control surface of its own; see the `sysvisor-rpc` crate for that.
//!
//! # Example
//!
//! ```rust,ignore
//! use sysvisor_core::{Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> sysvisor_core::Result<()> {
//!     let supervisor = Supervisor::builder(SupervisorConfig::new("/etc/sysvisor/domains.json"))
//!         .build()?;
//!
//!     supervisor.boot().await;
//!     let timer = supervisor.clone().run();
//!
//!     supervisor.start("indexer").await?;
//!     supervisor.session_ended().await;
//!     timer.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod monitor;
pub mod platform;
pub mod power;
pub mod process;
pub mod registry;
pub mod supervisor;
pub mod sync;

// Re-export commonly used types
pub use catalog::{qualified_name, Catalog, CatalogEntry, MemoryCatalog, SqliteCatalog};
pub use config::{SupervisorConfig, SupervisorDefaults};
pub use domain::{ProcessDescriptor, ProcessRecord, ProcessSnapshot, ProcessState};
pub use error::{Result, SupervisorError};
pub use monitor::{Monitor, MonitorEvent};
pub use power::{CommandPowerControl, PowerControl};
pub use process::{ExitStatus, NativeProcessControl, ProcessControl, ProcessHandle, ProcessSignal};
pub use registry::Registry;
pub use supervisor::{
    BootReport, StartOutcome, StopOutcome, Supervisor, SupervisorBuilder, SupervisorHandle,
    TerminationReport, TickReport,
};
pub use sync::{ConfigSynchronizer, ReconcilePlan};
