// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid simulation id '{id}': {reason}")]
    InvalidSimulationId { id: String, reason: String },

    #[error("Invalid provisioning spec: {0}")]
    InvalidProvisioningSpec(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
