//! Concurrent registry access from many tasks

use futures::future::join_all;
use serde_json::json;
use simrunner_core::application::{InstanceRegistry, RegistryConfig};
use simrunner_core::domain::{ProvisioningSpec, SimulationId, WorkerMessage};
use simrunner_core::error::AppError;
use simrunner_core::port::source_fetcher::mocks::MockSourceFetcher;
use simrunner_core::port::time_provider::SystemTimeProvider;
use simrunner_core::port::worker::mocks::{EchoState, EchoWorker};
use simrunner_core::port::{factory_fn, WorkerError, WorkerFactory, WorkerHandle};
use simrunner_infra_messaging::BroadcastGroups;
use std::sync::Arc;
use std::time::Duration;

fn registry() -> Arc<InstanceRegistry> {
    Arc::new(InstanceRegistry::new(
        Arc::new(BroadcastGroups::default()),
        Arc::new(MockSourceFetcher::new_success()),
        Arc::new(SystemTimeProvider),
        RegistryConfig::default(),
    ))
}

/// Every construction gets its own worker state
fn fresh_echo_factory() -> Arc<dyn WorkerFactory> {
    factory_fn(|| {
        let worker = EchoWorker::new(Arc::new(EchoState::default()));
        Ok(Box::new(worker) as Box<dyn WorkerHandle>)
    })
}

fn id(i: usize) -> SimulationId {
    SimulationId::new(format!("sim-{}", i)).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_spawn_and_kill_distinct_ids() {
    const N: usize = 64;
    let registry = registry();

    let spawns = (0..N).map(|i| {
        let registry = registry.clone();
        tokio::spawn(async move {
            let factory = fresh_echo_factory();
            registry.spawn(&id(i), factory.as_ref()).await
        })
    });
    for result in join_all(spawns).await {
        result.unwrap().unwrap();
    }

    assert_eq!(registry.len(), N);
    assert!((0..N).all(|i| registry.is_running(&id(i))));

    let kills = (0..N).map(|i| {
        let registry = registry.clone();
        tokio::spawn(async move { registry.kill(&id(i), false).await })
    });
    let removed: Vec<bool> = join_all(kills)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert!(removed.iter().all(|r| *r));
    assert!(registry.is_empty());
    assert!((0..N).all(|i| !registry.is_running(&id(i))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_provisioning_distinct_ids() {
    const N: usize = 32;
    let registry = registry();

    let tasks: Vec<_> = (0..N)
        .map(|i| {
            let spec = ProvisioningSpec::new(
                "https://example.com/sim.git",
                "main",
                format!("/tmp/backends/sim-{}", i),
            )
            .unwrap();
            registry.spawn_from_branch(&id(i), spec, fresh_echo_factory())
        })
        .collect();

    // Every id is visible before any provisioning finished
    assert_eq!(registry.len(), N);

    for task in join_all(tasks).await {
        task.unwrap();
    }

    for i in 0..N {
        registry
            .send(&id(i), WorkerMessage::new(json!({"n": i})))
            .await
            .unwrap();
    }
    assert_eq!(registry.shutdown().await, N);
    assert!(registry.is_empty());
}

/// Interleaved spawn/send/kill on a small id space must neither deadlock nor panic
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_spawn_send_kill_stress() {
    const IDS: usize = 8;
    const TASKS: usize = 16;
    const ROUNDS: usize = 50;
    let registry = registry();

    let workers = (0..TASKS).map(|t| {
        let registry = registry.clone();
        tokio::spawn(async move {
            for round in 0..ROUNDS {
                let sim = id((t + round) % IDS);
                match (t * 7 + round) % 3 {
                    0 => {
                        let factory = fresh_echo_factory();
                        registry.spawn(&sim, factory.as_ref()).await.unwrap();
                    }
                    1 => {
                        let message = WorkerMessage::new(json!({"round": round}));
                        match registry.send(&sim, message).await {
                            // Another task may have killed the id or closed its handle
                            Ok(())
                            | Err(AppError::NotFound(_))
                            | Err(AppError::Worker(WorkerError::Closed)) => {}
                            Err(e) => panic!("unexpected send error: {}", e),
                        }
                    }
                    _ => {
                        registry.kill(&sim, false).await;
                    }
                }
                tokio::task::yield_now().await;
            }
        })
    });

    let finished = tokio::time::timeout(Duration::from_secs(30), join_all(workers))
        .await
        .expect("stress run deadlocked");
    for result in finished {
        result.unwrap();
    }

    // Whatever survived is consistent and can be torn down
    let remaining = registry.len();
    assert!(remaining <= IDS);
    assert_eq!(registry.shutdown().await, remaining);
    assert!((0..IDS).all(|i| !registry.is_running(&id(i))));
}
