// Application Layer - Use Cases and Business Logic

pub mod provisioning;
pub mod registry;

// Re-exports
pub use provisioning::{CloneProgress, ProvisioningTask};
pub use registry::{InstanceRegistry, ProvisioningFailurePolicy, RegistryConfig};
