//! OS process primitive.
//!
//! The supervisor only talks to processes through [`ProcessControl`]:
//! spawn, signal, liveness and exit status. [`NativeProcessControl`] is the
//! real implementation; tests substitute an in-memory one.

mod control;
#[cfg(test)]
pub(crate) mod fake;
mod native;

pub use control::{ExitStatus, ProcessControl, ProcessHandle, ProcessSignal};
pub use native::NativeProcessControl;
