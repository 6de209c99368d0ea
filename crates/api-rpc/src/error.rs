//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;
use simrunner_core::error::AppError;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const NOT_READY: i32 = 4004;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SYSTEM_ERROR: i32 = 5002;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let code = match &err {
        AppError::Domain(_) => code::VALIDATION_ERROR,
        AppError::NotFound(_) => code::NOT_FOUND,
        AppError::AlreadyRunning(_) => code::CONFLICT,
        AppError::NotReady(_) => code::NOT_READY,
        AppError::Worker(_) => code::SYSTEM_ERROR,
        AppError::Config(_) => code::INTERNAL_ERROR,
    };
    ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use simrunner_core::domain::{DomainError, SimulationId};
    use simrunner_core::port::WorkerError;

    fn id() -> SimulationId {
        SimulationId::new("sim-1").unwrap()
    }

    #[test]
    fn test_error_codes() {
        let cases = [
            (
                AppError::Domain(DomainError::InvalidProvisioningSpec("x".into())),
                code::VALIDATION_ERROR,
            ),
            (AppError::NotFound(id()), code::NOT_FOUND),
            (AppError::AlreadyRunning(id()), code::CONFLICT),
            (AppError::NotReady(id()), code::NOT_READY),
            (AppError::Worker(WorkerError::Closed), code::SYSTEM_ERROR),
            (AppError::Config("bad policy".into()), code::INTERNAL_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(to_rpc_error(err).code(), expected);
        }
    }

    #[test]
    fn test_message_names_the_simulation() {
        let err = to_rpc_error(AppError::NotReady(id()));
        assert!(err.message().contains("sim-1"));
    }
}
