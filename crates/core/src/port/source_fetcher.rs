// Source Fetcher Port
// Fetches a worker's source from version control before it can be constructed

use crate::domain::ProvisioningSpec;
use async_trait::async_trait;
use thiserror::Error;

/// Fetch errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Fetch could not start: {0}")]
    SpawnFailed(String),

    #[error("Fetch failed (exit code {code:?}): {detail}")]
    Failed { code: Option<i32>, detail: String },

    #[error("Fetch timed out after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(String),
}

/// Receives human-readable progress lines while a fetch runs
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, line: &str);
}

/// Version-control source fetcher
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch `spec.branch()` of `spec.source_url()` into `spec.target_dir()`
    ///
    /// # Errors
    /// - FetchError::SpawnFailed if the fetch tool cannot be started
    /// - FetchError::Failed for network, branch or filesystem errors reported by the tool
    /// - FetchError::Timeout if the fetch exceeds its deadline
    async fn fetch(
        &self,
        spec: &ProvisioningSpec,
        progress: &dyn ProgressObserver,
    ) -> Result<(), FetchError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    /// Mock fetch behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Report these progress lines, then succeed
        Success(Vec<String>),
        /// Fail with message
        Fail(String),
    }

    /// Mock SourceFetcher for testing
    pub struct MockSourceFetcher {
        behavior: MockBehavior,
        gate: Option<Arc<Notify>>,
        fetched: Mutex<Vec<ProvisioningSpec>>,
    }

    impl MockSourceFetcher {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                gate: None,
                fetched: Mutex::new(Vec::new()),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success(vec![
                "Receiving objects: 50% (1/2)".to_string(),
                "Receiving objects: 100% (2/2), done.".to_string(),
            ]))
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        /// Hold every fetch until the returned gate is notified
        pub fn gated(mut self) -> (Self, Arc<Notify>) {
            let gate = Arc::new(Notify::new());
            self.gate = Some(Arc::clone(&gate));
            (self, gate)
        }

        pub fn fetched(&self) -> Vec<ProvisioningSpec> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SourceFetcher for MockSourceFetcher {
        async fn fetch(
            &self,
            spec: &ProvisioningSpec,
            progress: &dyn ProgressObserver,
        ) -> Result<(), FetchError> {
            self.fetched.lock().unwrap().push(spec.clone());

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            match &self.behavior {
                MockBehavior::Success(lines) => {
                    for line in lines {
                        progress.on_progress(line);
                    }
                    Ok(())
                }
                MockBehavior::Fail(msg) => Err(FetchError::Failed {
                    code: Some(128),
                    detail: msg.clone(),
                }),
            }
        }
    }
}
