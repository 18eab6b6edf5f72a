//! Config file and session file persistence.

mod atomic;
mod schema;
mod synchronizer;

pub use atomic::atomic_write_json;
pub use synchronizer::{ConfigSynchronizer, ReconcilePlan};

pub(crate) use schema::validate_domain_name;
