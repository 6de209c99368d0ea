// ID Provider Port (for deterministic testing)

use crate::domain::SimulationId;

/// ID provider interface (allows deterministic IDs in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new unique simulation ID
    fn generate_id(&self) -> SimulationId;
}

/// UUID v4 provider (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> SimulationId {
        SimulationId::generate()
    }
}
