//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::to_rpc_error;
use crate::types::{
    KillRequest, KillResponse, ListResponse, SendRequest, SendResponse, SimulationSummary,
    SpawnRequest, SpawnResponse, StatusRequest, StatusResponse, SubscribeRequest,
};
use jsonrpsee::core::SubscriptionResult;
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::{PendingSubscriptionSink, SubscriptionMessage};
use simrunner_core::application::InstanceRegistry;
use simrunner_core::domain::{InstanceState, ProvisioningSpec, SimulationId, WorkerMessage};
use simrunner_core::error::AppError;
use simrunner_core::port::{IdProvider, MessagingGroups, WorkerLauncher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    registry: Arc<InstanceRegistry>,
    launcher: Arc<dyn WorkerLauncher>,
    id_provider: Arc<dyn IdProvider>,
    groups: Arc<dyn MessagingGroups>,
    backends_dir: PathBuf,
}

fn parse_id(raw: String) -> Result<SimulationId, ErrorObjectOwned> {
    SimulationId::new(raw)
        .map_err(AppError::from)
        .map_err(to_rpc_error)
}

impl RpcHandler {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        launcher: Arc<dyn WorkerLauncher>,
        id_provider: Arc<dyn IdProvider>,
        groups: Arc<dyn MessagingGroups>,
        backends_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            launcher,
            id_provider,
            groups,
            backends_dir,
        }
    }

    /// sim.spawn.v1
    ///
    /// Returns once the id is reserved; the clone and worker start continue
    /// in the background and report through `sim.subscribe.v1`.
    pub async fn spawn(&self, params: SpawnRequest) -> Result<SpawnResponse, ErrorObjectOwned> {
        let id = match params.sim_id {
            Some(raw) => parse_id(raw)?,
            None => self.id_provider.generate_id(),
        };

        let source_dir = self.checkout_dir(&id);
        let spec = ProvisioningSpec::new(params.source_url, params.branch, &source_dir)
            .map_err(AppError::from)
            .map_err(to_rpc_error)?;
        let factory = self.launcher.factory_for(&id, &source_dir);

        self.registry
            .try_spawn_from_branch(&id, spec.clone(), factory)
            .map_err(to_rpc_error)?;
        info!(
            sim_id = %id,
            url = %spec.source_url(),
            branch = %spec.branch(),
            source_dir = %source_dir.display(),
            "Spawn requested"
        );

        Ok(SpawnResponse {
            sim_id: id.to_string(),
            state: InstanceState::Provisioning,
        })
    }

    /// Fresh clone target for one spawn of `id`
    ///
    /// git refuses to clone into a non-empty directory, and a killed
    /// provisioning may still be writing its own checkout.
    fn checkout_dir(&self, id: &SimulationId) -> PathBuf {
        self.backends_dir
            .join(id.as_str())
            .join(Uuid::new_v4().simple().to_string())
    }

    /// sim.kill.v1
    pub async fn kill(&self, params: KillRequest) -> Result<KillResponse, ErrorObjectOwned> {
        let id = parse_id(params.sim_id)?;
        let removed = self.registry.kill(&id, params.remove_only).await;

        Ok(KillResponse {
            sim_id: id.to_string(),
            removed,
        })
    }

    /// sim.status.v1
    pub async fn status(&self, params: StatusRequest) -> Result<StatusResponse, ErrorObjectOwned> {
        let id = parse_id(params.sim_id)?;

        Ok(StatusResponse {
            running: self.registry.is_running(&id),
            sim_id: id.to_string(),
        })
    }

    /// sim.list.v1
    pub async fn list(&self) -> Result<ListResponse, ErrorObjectOwned> {
        Ok(ListResponse {
            simulations: self
                .registry
                .snapshot()
                .into_iter()
                .map(SimulationSummary::from)
                .collect(),
        })
    }

    /// sim.send.v1
    pub async fn send(&self, params: SendRequest) -> Result<SendResponse, ErrorObjectOwned> {
        let id = parse_id(params.sim_id)?;
        self.registry
            .send(&id, WorkerMessage::new(params.message))
            .await
            .map_err(to_rpc_error)?;

        Ok(SendResponse {
            sim_id: id.to_string(),
            delivered: true,
        })
    }

    /// sim.subscribe.v1
    ///
    /// Streams the simulation's client messages as `sim.message`
    /// notifications until its group closes or the client goes away.
    pub async fn subscribe(
        &self,
        params: SubscribeRequest,
        pending: PendingSubscriptionSink,
    ) -> SubscriptionResult {
        let id = match parse_id(params.sim_id) {
            Ok(id) => id,
            Err(e) => {
                pending.reject(e).await;
                return Ok(());
            }
        };

        let mut rx = match self.groups.subscribe(&id.topic()) {
            Ok(rx) => rx,
            Err(_) => {
                pending
                    .reject(to_rpc_error(AppError::NotFound(id)))
                    .await;
                return Ok(());
            }
        };

        let sink = pending.accept().await?;
        debug!(sim_id = %id, "Subscription opened");

        loop {
            tokio::select! {
                _ = sink.closed() => break,
                received = rx.recv() => match received {
                    Ok(message) => {
                        sink.send(SubscriptionMessage::from_json(&message)?).await?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(sim_id = %id, skipped = skipped, "Subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        debug!(sim_id = %id, "Subscription ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use serde_json::json;
    use simrunner_core::application::RegistryConfig;
    use simrunner_core::port::id_provider::UuidProvider;
    use simrunner_core::port::messaging::mocks::RecordingGroups;
    use simrunner_core::port::source_fetcher::mocks::MockSourceFetcher;
    use simrunner_core::port::time_provider::mocks::FixedTimeProvider;
    use simrunner_core::port::worker::mocks::{EchoFactory, EchoLauncher};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio_test::assert_ok;

    struct Fixture {
        handler: RpcHandler,
        launcher: Arc<EchoLauncher>,
        gate: Arc<Notify>,
    }

    fn fixture() -> Fixture {
        let groups = Arc::new(RecordingGroups::new());
        let (fetcher, gate) = MockSourceFetcher::new_success().gated();
        let registry = Arc::new(InstanceRegistry::new(
            groups.clone(),
            Arc::new(fetcher),
            Arc::new(FixedTimeProvider::new(1_000)),
            RegistryConfig::default(),
        ));
        let launcher = Arc::new(EchoLauncher::new(EchoFactory::new()));

        Fixture {
            handler: RpcHandler::new(
                registry,
                launcher.clone(),
                Arc::new(UuidProvider),
                groups,
                PathBuf::from("/srv/backends"),
            ),
            launcher,
            gate,
        }
    }

    fn spawn_request(sim_id: Option<&str>) -> SpawnRequest {
        SpawnRequest {
            source_url: "https://example.com/sim.git".to_string(),
            branch: "main".to_string(),
            sim_id: sim_id.map(str::to_string),
        }
    }

    async fn wait_until_sendable(handler: &RpcHandler, sim_id: &str) -> bool {
        for _ in 0..100 {
            let sent = handler
                .send(SendRequest {
                    sim_id: sim_id.to_string(),
                    message: json!({"ping": 1}),
                })
                .await;
            if sent.is_ok() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_spawn_generates_id_and_reserves() {
        let fx = fixture();

        let resp = assert_ok!(fx.handler.spawn(spawn_request(None)).await);

        assert_eq!(resp.state, InstanceState::Provisioning);
        assert!(SimulationId::new(resp.sim_id.clone()).is_ok());

        let status = assert_ok!(
            fx.handler
                .status(StatusRequest {
                    sim_id: resp.sim_id.clone()
                })
                .await
        );
        assert!(status.running);

        let launched = fx.launcher.launched();
        assert_eq!(launched.len(), 1);
        assert_eq!(
            launched[0].1.parent(),
            Some(PathBuf::from("/srv/backends").join(&resp.sim_id).as_path())
        );
    }

    #[tokio::test]
    async fn test_send_before_and_after_provisioning() {
        let fx = fixture();
        assert_ok!(fx.handler.spawn(spawn_request(Some("sim-1"))).await);

        let err = fx
            .handler
            .send(SendRequest {
                sim_id: "sim-1".to_string(),
                message: json!({"ping": 0}),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::NOT_READY);

        fx.gate.notify_one();
        assert!(wait_until_sendable(&fx.handler, "sim-1").await);
        assert_eq!(fx.launcher.factory().state().received().len(), 1);
    }

    #[tokio::test]
    async fn test_spawn_conflict_and_validation() {
        let fx = fixture();
        assert_ok!(fx.handler.spawn(spawn_request(Some("sim-1"))).await);

        let err = fx
            .handler
            .spawn(spawn_request(Some("sim-1")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::CONFLICT);

        let err = fx
            .handler
            .spawn(spawn_request(Some("../etc")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);

        let mut bad_branch = spawn_request(Some("sim-2"));
        bad_branch.branch = "--upload-pack=evil".to_string();
        let err = fx.handler.spawn(bad_branch).await.unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn test_respawn_after_kill_uses_fresh_checkout() {
        let fx = fixture();
        assert_ok!(fx.handler.spawn(spawn_request(Some("sim-1"))).await);
        fx.gate.notify_one();
        assert!(wait_until_sendable(&fx.handler, "sim-1").await);

        let killed = assert_ok!(
            fx.handler
                .kill(KillRequest {
                    sim_id: "sim-1".to_string(),
                    remove_only: false
                })
                .await
        );
        assert!(killed.removed);

        let resp = assert_ok!(fx.handler.spawn(spawn_request(Some("sim-1"))).await);
        assert_eq!(resp.state, InstanceState::Provisioning);

        let launched = fx.launcher.launched();
        assert_eq!(launched.len(), 2);
        assert_ne!(launched[0].1, launched[1].1);
        assert_eq!(launched[0].1.parent(), launched[1].1.parent());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_spawns_of_one_id_reserve_once() {
        let fx = Arc::new(fixture());

        let calls = (0..16).map(|_| {
            let fx = Arc::clone(&fx);
            tokio::spawn(async move { fx.handler.spawn(spawn_request(Some("sim-race"))).await })
        });
        let results: Vec<_> = futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.code() == code::CONFLICT));
        assert_eq!(assert_ok!(fx.handler.list().await).simulations.len(), 1);
    }

    #[tokio::test]
    async fn test_kill_and_list() {
        let fx = fixture();
        assert_ok!(fx.handler.spawn(spawn_request(Some("sim-b"))).await);
        assert_ok!(fx.handler.spawn(spawn_request(Some("sim-a"))).await);

        let list = assert_ok!(fx.handler.list().await);
        let ids: Vec<&str> = list.simulations.iter().map(|s| s.sim_id.as_str()).collect();
        assert_eq!(ids, vec!["sim-a", "sim-b"]);
        assert!(list
            .simulations
            .iter()
            .all(|s| s.state == InstanceState::Provisioning && s.registered_at == 1_000));

        let killed = assert_ok!(
            fx.handler
                .kill(KillRequest {
                    sim_id: "sim-a".to_string(),
                    remove_only: false
                })
                .await
        );
        assert!(killed.removed);

        let again = assert_ok!(
            fx.handler
                .kill(KillRequest {
                    sim_id: "sim-a".to_string(),
                    remove_only: false
                })
                .await
        );
        assert!(!again.removed);
        assert_eq!(assert_ok!(fx.handler.list().await).simulations.len(), 1);
    }

    #[tokio::test]
    async fn test_send_unknown_is_not_found() {
        let fx = fixture();

        let err = fx
            .handler
            .send(SendRequest {
                sim_id: "ghost".to_string(),
                message: json!(null),
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), code::NOT_FOUND);
    }
}
