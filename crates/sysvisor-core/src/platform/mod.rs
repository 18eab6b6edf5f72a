//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific process behavior live here rather than
//! being scattered through the supervisor.
//!
//! - **Linux/macOS**: Full support via `nix`
//! - **Other platforms**: Liveness via the child handle only; pause/resume
//!   and identity switching report an error

pub mod process;

pub use process::{is_process_alive, resolve_identity, send_signal};
