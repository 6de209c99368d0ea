// SimRunner Infrastructure - System Adapters
// Implements: SourceFetcher (git CLI), WorkerFactory/WorkerHandle (subprocess)

pub mod git_fetcher;
pub mod process_worker;

pub use git_fetcher::GitCliFetcher;
pub use process_worker::{
    ProcessWorker, ProcessWorkerConfig, ProcessWorkerFactory, ProcessWorkerLauncher,
};
