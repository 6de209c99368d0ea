// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod messaging;
pub mod source_fetcher;
pub mod time_provider;
pub mod worker;

// Re-exports
pub use id_provider::IdProvider;
pub use messaging::{GroupReceiver, MessagingError, MessagingGroups};
pub use source_fetcher::{FetchError, ProgressObserver, SourceFetcher};
pub use time_provider::TimeProvider;
pub use worker::{factory_fn, WorkerError, WorkerFactory, WorkerHandle, WorkerLauncher};
