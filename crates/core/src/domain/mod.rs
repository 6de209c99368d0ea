// Domain Layer - Pure business logic and entities

pub mod error;
pub mod message;
pub mod simulation;

// Re-exports
pub use error::DomainError;
pub use message::{ClientMessage, WorkerMessage};
pub use simulation::{InstanceState, InstanceStatus, ProvisioningSpec, SimulationId};
