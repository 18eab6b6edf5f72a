//! On-disk encoding of the domain list and the session file.
//!
//! ```json
//! {
//!   "indexer": {
//!     "LaunchPath": "/usr/bin/indexer",
//!     "Arguments": ["--watch", "/home"],
//!     "UserName": "nobody",
//!     "OnDemand": false,
//!     "Persistent": true,
//!     "Hidden": 1
//!   }
//! }
//! ```
//!
//! Decoding validates every entry up front so a bad file is rejected as a
//! whole instead of failing at the first start of a domain.

use crate::domain::ProcessDescriptor;
use crate::error::{Result, SupervisorError};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// One domain entry as stored in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DomainEntry {
    #[serde(rename = "LaunchPath")]
    launch_path: String,
    #[serde(rename = "Arguments", default)]
    arguments: Arguments,
    #[serde(
        rename = "UserName",
        alias = "Identity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    user_name: Option<String>,
    #[serde(rename = "OnDemand", default, deserialize_with = "flag")]
    on_demand: bool,
    #[serde(rename = "Persistent", default, deserialize_with = "flag")]
    persistent: bool,
    #[serde(rename = "Hidden", default, deserialize_with = "flag")]
    hidden: bool,
}

/// Arguments as a list, or as one whitespace-separated string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Arguments {
    List(Vec<String>),
    Line(String),
}

impl Default for Arguments {
    fn default() -> Self {
        Arguments::List(Vec::new())
    }
}

impl Arguments {
    fn into_vec(self) -> Vec<String> {
        match self {
            Arguments::List(args) => args,
            Arguments::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        }
    }
}

/// Booleans written either as JSON booleans or as `0` / `1`.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(other) => Err(D::Error::custom(format!(
            "expected a boolean or 0/1, got {}",
            other
        ))),
    }
}

impl DomainEntry {
    fn from_descriptor(descriptor: &ProcessDescriptor) -> Self {
        Self {
            launch_path: descriptor.launch_path.display().to_string(),
            arguments: Arguments::List(descriptor.arguments.clone()),
            user_name: descriptor.identity.clone(),
            on_demand: descriptor.on_demand,
            persistent: descriptor.persistent,
            hidden: descriptor.hidden,
        }
    }

    fn into_descriptor(self, domain: &str) -> ProcessDescriptor {
        ProcessDescriptor {
            domain: domain.to_string(),
            launch_path: PathBuf::from(self.launch_path),
            arguments: self.arguments.into_vec(),
            identity: self.user_name.filter(|name| !name.is_empty()),
            on_demand: self.on_demand,
            persistent: self.persistent,
            hidden: self.hidden,
        }
    }
}

/// Contents of the session file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SessionFile {
    #[serde(default)]
    pub(crate) running: BTreeSet<String>,
}

fn corrupt(path: &Path, message: impl Into<String>) -> SupervisorError {
    SupervisorError::ConfigCorrupt {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Reject names that cannot be namespaced under the catalog name.
pub(crate) fn validate_domain_name(domain: &str) -> std::result::Result<(), String> {
    if domain.trim().is_empty() {
        return Err("empty domain name".to_string());
    }
    if domain.contains('/') {
        return Err(format!("domain name '{}' contains '/'", domain));
    }
    Ok(())
}

/// Decode and validate the config file contents.
pub(crate) fn decode_config(
    path: &Path,
    contents: &str,
) -> Result<BTreeMap<String, ProcessDescriptor>> {
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let entries: BTreeMap<String, DomainEntry> =
        serde_json::from_str(contents).map_err(|e| corrupt(path, e.to_string()))?;

    let mut descriptors = BTreeMap::new();
    for (domain, entry) in entries {
        validate_domain_name(&domain).map_err(|message| corrupt(path, message))?;
        if entry.launch_path.trim().is_empty() {
            return Err(corrupt(path, format!("{}: LaunchPath is empty", domain)));
        }
        let descriptor = entry.into_descriptor(&domain);
        descriptors.insert(domain, descriptor);
    }
    Ok(descriptors)
}

/// Encode descriptors for the config file.
pub(crate) fn encode_config(
    descriptors: &BTreeMap<String, ProcessDescriptor>,
) -> BTreeMap<String, DomainEntry> {
    descriptors
        .iter()
        .map(|(domain, descriptor)| (domain.clone(), DomainEntry::from_descriptor(descriptor)))
        .collect()
}
