// Central Error Type for the Application

use crate::domain::SimulationId;
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Simulation not found: {0}")]
    NotFound(SimulationId),

    /// Entry exists but its worker is still being provisioned
    #[error("Simulation not ready: {0} (worker is still being provisioned)")]
    NotReady(SimulationId),

    #[error("Simulation already running: {0}")]
    AlreadyRunning(SimulationId),

    #[error("Worker error: {0}")]
    Worker(#[from] crate::port::WorkerError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
