// Simulation Domain Model

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Topic prefix of the per-simulation messaging group
pub const TOPIC_PREFIX: &str = "simcomms";

/// Maximum accepted length of an externally supplied id
pub const MAX_ID_LEN: usize = 64;

/// Simulation ID (UUID v4 when generated)
///
/// Doubles as a directory name for the provisioned backend, so ids coming
/// from outside the process are restricted to `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SimulationId(String);

impl SimulationId {
    /// Parse and validate an id
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let invalid = |reason: &str| DomainError::InvalidSimulationId {
            id: id.clone(),
            reason: reason.to_string(),
        };

        if id.is_empty() {
            return Err(invalid("empty"));
        }
        if id.len() > MAX_ID_LEN {
            return Err(invalid("too long"));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("only alphanumeric, '-' and '_' are allowed"));
        }

        Ok(Self(id))
    }

    /// Fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The nil UUID, reserved for the development simulation
    pub fn nil() -> Self {
        Self(uuid::Uuid::nil().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Messaging group topic for this simulation (`simcomms/<id>`)
    pub fn topic(&self) -> String {
        format!("{}/{}", TOPIC_PREFIX, self.0)
    }
}

impl std::fmt::Display for SimulationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SimulationId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for SimulationId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SimulationId> for String {
    fn from(id: SimulationId) -> Self {
        id.0
    }
}

/// Where to fetch a worker's source from, and where to put it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningSpec {
    source_url: String,
    branch: String,
    target_dir: PathBuf,
}

impl ProvisioningSpec {
    pub fn new(
        source_url: impl Into<String>,
        branch: impl Into<String>,
        target_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let source_url = source_url.into();
        let branch = branch.into();

        if source_url.trim().is_empty() {
            return Err(DomainError::InvalidProvisioningSpec(
                "source url is empty".to_string(),
            ));
        }
        if branch.trim().is_empty() {
            return Err(DomainError::InvalidProvisioningSpec(
                "branch is empty".to_string(),
            ));
        }
        // Would be parsed as an option by the fetcher
        if branch.starts_with('-') {
            return Err(DomainError::InvalidProvisioningSpec(format!(
                "branch '{}' must not start with '-'",
                branch
            )));
        }

        Ok(Self {
            source_url,
            branch,
            target_dir: target_dir.into(),
        })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }
}

/// Externally visible lifecycle state of a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    /// Placeholder, provisioning in flight
    Provisioning,
    /// Placeholder kept after a failed provisioning
    ProvisioningFailed,
    /// Live handle that has not closed
    Running,
    /// Live handle that reports itself closed
    Closed,
}

impl InstanceState {
    /// Whether `is_running` reports true for this state
    pub fn is_active(self) -> bool {
        !matches!(self, InstanceState::Closed)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Provisioning => write!(f, "PROVISIONING"),
            InstanceState::ProvisioningFailed => write!(f, "PROVISIONING_FAILED"),
            InstanceState::Running => write!(f, "RUNNING"),
            InstanceState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Snapshot row describing one registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub id: SimulationId,
    pub state: InstanceState,
    pub registered_at: i64, // epoch ms
}
