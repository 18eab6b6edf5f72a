//! Launch description for one domain.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Immutable launch description for one domain.
///
/// Records share a descriptor behind an `Arc`; changing any field means
/// building a new descriptor and swapping it in through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    /// Unique domain name.
    pub domain: String,
    /// Executable path.
    pub launch_path: PathBuf,
    /// Arguments passed to the executable, in order.
    pub arguments: Vec<String>,
    /// User to run the process as.
    pub identity: Option<String>,
    /// Started on first use instead of at boot.
    pub on_demand: bool,
    /// Running intent survives a supervisor restart.
    pub persistent: bool,
    /// Excluded from default listings.
    pub hidden: bool,
}

impl ProcessDescriptor {
    /// Create an eager, non-persistent, visible descriptor without arguments.
    pub fn new(domain: impl Into<String>, launch_path: impl AsRef<Path>) -> Self {
        Self {
            domain: domain.into(),
            launch_path: launch_path.as_ref().to_path_buf(),
            arguments: Vec::new(),
            identity: None,
            on_demand: false,
            persistent: false,
            hidden: false,
        }
    }

    /// Set the argument list.
    pub fn with_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    /// Append one argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// Run as the given user.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn on_demand(mut self, on_demand: bool) -> Self {
        self.on_demand = on_demand;
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    /// Whether boot starts this domain without a persisted running intent.
    pub fn starts_eagerly(&self) -> bool {
        !self.on_demand
    }

    /// Command line for log output.
    pub fn command_line(&self) -> String {
        let mut line = self.launch_path.display().to_string();
        for arg in &self.arguments {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}
