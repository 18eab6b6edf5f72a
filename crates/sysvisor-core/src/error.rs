//! Error types for the supervisor.
//!
//! The domain-facing variants mirror the failure taxonomy exposed on the
//! control surface; the remaining ones wrap the ambient I/O, JSON and
//! catalog failures so they can be propagated with `?`.

use crate::domain::ProcessState;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    // Domain errors
    #[error("Unknown domain: {domain}")]
    UnknownDomain { domain: String },

    #[error("Domain already running: {domain}")]
    AlreadyRunning { domain: String },

    #[error("Domain not running: {domain}")]
    NotRunning { domain: String },

    #[error("Launch failed for {domain}: {message}")]
    LaunchFailed { domain: String, message: String },

    #[error("Cannot {operation} {domain} while {state}")]
    InvalidState {
        domain: String,
        state: ProcessState,
        operation: &'static str,
    },

    // Config file errors
    #[error("Config file {path} is corrupt: {message}")]
    ConfigCorrupt { path: PathBuf, message: String },

    #[error("Failed to write config file {path}: {message}")]
    ConfigWriteFailed {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Catalog errors
    #[error("Catalog error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Control surface errors
    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

impl From<std::io::Error> for SupervisorError {
    fn from(err: std::io::Error) -> Self {
        SupervisorError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SupervisorError {
    fn from(err: serde_json::Error) -> Self {
        SupervisorError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for SupervisorError {
    fn from(err: rusqlite::Error) -> Self {
        SupervisorError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl SupervisorError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SupervisorError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub(crate) fn unknown(domain: impl Into<String>) -> Self {
        SupervisorError::UnknownDomain {
            domain: domain.into(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32001: Unknown domain
    /// - -32002: Benign state mismatch (already running / not running)
    /// - -32003: Launch failed
    /// - -32004: Invalid state transition
    /// - -32005: Config file corrupt or unwritable
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            SupervisorError::UnknownDomain { .. } => -32001,

            SupervisorError::AlreadyRunning { .. } | SupervisorError::NotRunning { .. } => -32002,

            SupervisorError::LaunchFailed { .. } => -32003,

            SupervisorError::InvalidState { .. } => -32004,

            SupervisorError::ConfigCorrupt { .. } | SupervisorError::ConfigWriteFailed { .. } => {
                -32005
            }

            SupervisorError::InvalidParams { .. } => -32602,

            _ => -32603,
        }
    }

    /// Whether the error only reports that the requested state already holds.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            SupervisorError::AlreadyRunning { .. } | SupervisorError::NotRunning { .. }
        )
    }
}
