//! Domain model: the immutable launch description and the mutable runtime record.

mod descriptor;
mod record;

pub use descriptor::ProcessDescriptor;
pub use record::{ProcessRecord, ProcessSnapshot, ProcessState};
