// Registry configuration

use crate::error::AppError;
use serde::{Deserialize, Serialize};

/// What happens to a placeholder whose provisioning failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisioningFailurePolicy {
    /// Leave it registered (marked failed) so the id stays visible until killed
    #[default]
    KeepPlaceholder,
    /// Remove it and close the messaging group once the error is published
    RemovePlaceholder,
}

impl std::str::FromStr for ProvisioningFailurePolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" | "keep-placeholder" => Ok(Self::KeepPlaceholder),
            "remove" | "remove-placeholder" => Ok(Self::RemovePlaceholder),
            other => Err(AppError::Config(format!(
                "unknown provisioning failure policy '{}' (expected 'keep' or 'remove')",
                other
            ))),
        }
    }
}

/// Instance registry configuration
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    pub failure_policy: ProvisioningFailurePolicy,
}
