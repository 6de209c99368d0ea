// Worker Handle Port
// Contract between the registry and whatever actually runs a simulation

use crate::domain::{SimulationId, WorkerMessage};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Worker errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Worker is closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Close failed: {0}")]
    CloseFailed(String),
}

/// Handle to a running worker
///
/// The registry owns handles exclusively and calls these methods without
/// holding its lock, so implementations may block for as long as they need.
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    /// Stop the worker and wait for it to go away
    async fn close(&self) -> Result<(), WorkerError>;

    /// Whether the worker has stopped (closed or exited on its own)
    fn is_closed(&self) -> bool;

    /// Deliver a message to the worker
    async fn send(&self, message: WorkerMessage) -> Result<(), WorkerError>;
}

/// Capability to construct one worker
///
/// Captures everything construction needs at the call site, so the registry
/// never deals with worker-specific arguments.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn construct(&self) -> Result<Box<dyn WorkerHandle>, WorkerError>;
}

/// Builds the factory for a simulation whose source lives in `source_dir`
pub trait WorkerLauncher: Send + Sync {
    fn factory_for(&self, id: &SimulationId, source_dir: &Path) -> Arc<dyn WorkerFactory>;
}

/// Factory backed by a synchronous closure
pub struct FnFactory<F>(F);

#[async_trait]
impl<F> WorkerFactory for FnFactory<F>
where
    F: Fn() -> Result<Box<dyn WorkerHandle>, WorkerError> + Send + Sync,
{
    async fn construct(&self) -> Result<Box<dyn WorkerHandle>, WorkerError> {
        (self.0)()
    }
}

/// Wrap a closure as a shareable factory
///
/// # Example
/// ```text
/// let factory = factory_fn(|| Ok(Box::new(MyWorker::new()) as Box<dyn WorkerHandle>));
/// registry.spawn(&id, factory.as_ref()).await?;
/// ```
pub fn factory_fn<F>(f: F) -> Arc<dyn WorkerFactory>
where
    F: Fn() -> Result<Box<dyn WorkerHandle>, WorkerError> + Send + Sync + 'static,
{
    Arc::new(FnFactory(f))
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// State shared between an EchoWorker and the test that inspects it
    #[derive(Default)]
    pub struct EchoState {
        received: Mutex<Vec<WorkerMessage>>,
        closed: AtomicBool,
        close_calls: AtomicUsize,
    }

    impl EchoState {
        pub fn received(&self) -> Vec<WorkerMessage> {
            self.received.lock().unwrap().clone()
        }

        pub fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        /// Simulate the worker exiting on its own
        pub fn mark_exited(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Worker that records every message it receives
    pub struct EchoWorker {
        state: Arc<EchoState>,
        close_delay: Option<Duration>,
    }

    impl EchoWorker {
        pub fn new(state: Arc<EchoState>) -> Self {
            Self {
                state,
                close_delay: None,
            }
        }
    }

    #[async_trait]
    impl WorkerHandle for EchoWorker {
        async fn close(&self) -> Result<(), WorkerError> {
            self.state.close_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.close_delay {
                tokio::time::sleep(delay).await;
            }
            self.state.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.state.is_closed()
        }

        async fn send(&self, message: WorkerMessage) -> Result<(), WorkerError> {
            if self.state.is_closed() {
                return Err(WorkerError::Closed);
            }
            self.state.received.lock().unwrap().push(message);
            Ok(())
        }
    }

    /// Factory producing EchoWorkers (or failing on purpose)
    pub struct EchoFactory {
        state: Arc<EchoState>,
        failure: Option<String>,
        close_delay: Option<Duration>,
        constructions: AtomicUsize,
    }

    impl Default for EchoFactory {
        fn default() -> Self {
            Self::new()
        }
    }

    impl EchoFactory {
        pub fn new() -> Self {
            Self {
                state: Arc::new(EchoState::default()),
                failure: None,
                close_delay: None,
                constructions: AtomicUsize::new(0),
            }
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self {
                failure: Some(message.into()),
                ..Self::new()
            }
        }

        /// Workers built by this factory take `delay` to close
        pub fn with_close_delay(mut self, delay: Duration) -> Self {
            self.close_delay = Some(delay);
            self
        }

        /// State of the workers built by this factory
        pub fn state(&self) -> Arc<EchoState> {
            Arc::clone(&self.state)
        }

        pub fn constructions(&self) -> usize {
            self.constructions.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WorkerFactory for EchoFactory {
        async fn construct(&self) -> Result<Box<dyn WorkerHandle>, WorkerError> {
            self.constructions.fetch_add(1, Ordering::SeqCst);
            if let Some(msg) = &self.failure {
                return Err(WorkerError::SpawnFailed(msg.clone()));
            }
            Ok(Box::new(EchoWorker {
                state: Arc::clone(&self.state),
                close_delay: self.close_delay,
            }))
        }
    }

    /// Launcher handing out one shared EchoFactory, recording each request
    #[derive(Default)]
    pub struct EchoLauncher {
        factory: Arc<EchoFactory>,
        launched: Mutex<Vec<(SimulationId, PathBuf)>>,
    }

    impl EchoLauncher {
        pub fn new(factory: EchoFactory) -> Self {
            Self {
                factory: Arc::new(factory),
                launched: Mutex::new(Vec::new()),
            }
        }

        pub fn factory(&self) -> Arc<EchoFactory> {
            Arc::clone(&self.factory)
        }

        pub fn launched(&self) -> Vec<(SimulationId, PathBuf)> {
            self.launched.lock().unwrap().clone()
        }
    }

    impl WorkerLauncher for EchoLauncher {
        fn factory_for(&self, id: &SimulationId, source_dir: &Path) -> Arc<dyn WorkerFactory> {
            self.launched
                .lock()
                .unwrap()
                .push((id.clone(), source_dir.to_path_buf()));
            self.factory.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::{EchoState, EchoWorker};
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_factory_fn_constructs() {
        let state = Arc::new(EchoState::default());
        let shared = Arc::clone(&state);
        let factory = factory_fn(move || {
            Ok(Box::new(EchoWorker::new(Arc::clone(&shared))) as Box<dyn WorkerHandle>)
        });

        let worker = factory.construct().await.unwrap();
        worker.send(WorkerMessage::new(json!("hi"))).await.unwrap();
        assert_eq!(state.received().len(), 1);
    }

    #[tokio::test]
    async fn test_echo_worker_rejects_after_close() {
        let state = Arc::new(EchoState::default());
        let worker = EchoWorker::new(Arc::clone(&state));

        worker.close().await.unwrap();
        assert!(worker.is_closed());
        assert_eq!(
            worker.send(WorkerMessage::new(json!(1))).await,
            Err(WorkerError::Closed)
        );
    }
}
