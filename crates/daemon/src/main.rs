//! SimRunner - Main Entry Point
//! Simulation registry + git provisioning + JSON-RPC server

mod config;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{DaemonConfig, LogFormat};
use simrunner_api_rpc::{RpcHandler, RpcServer, RpcServerConfig};
use simrunner_core::application::InstanceRegistry;
use simrunner_core::domain::SimulationId;
use simrunner_core::port::id_provider::UuidProvider;
use simrunner_core::port::time_provider::SystemTimeProvider;
use simrunner_core::port::{MessagingGroups, WorkerLauncher};
use simrunner_infra_messaging::BroadcastGroups;
use simrunner_infra_system::git_fetcher::DEFAULT_ENV_ALLOWLIST;
use simrunner_infra_system::{GitCliFetcher, ProcessWorkerConfig, ProcessWorkerLauncher};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_logging(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("simrunner=info"))
        .context("Failed to create env filter")?;

    match format {
        // Production: JSON structured logging
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let config = DaemonConfig::from_env()?;
    init_logging(config.log_format)?;

    info!("SimRunner v{} starting...", VERSION);
    info!(
        backends_dir = %config.backends_dir.display(),
        worker = %config.worker_command,
        failure_policy = ?config.registry.failure_policy,
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.backends_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.backends_dir.display()))?;

    // 2. Setup dependencies (DI wiring)
    let env_allowlist: Vec<String> = DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect();

    let groups: Arc<dyn MessagingGroups> = Arc::new(BroadcastGroups::new(config.group_capacity));
    let fetcher = Arc::new(GitCliFetcher::new(
        config.git_bin.clone(),
        env_allowlist.clone(),
        config.clone_timeout,
    ));
    let launcher: Arc<dyn WorkerLauncher> = Arc::new(ProcessWorkerLauncher::new(
        ProcessWorkerConfig {
            program: config.worker_command.clone(),
            args: config.worker_args.clone(),
            env_allowlist,
        },
        groups.clone(),
    ));

    let registry = Arc::new(InstanceRegistry::new(
        groups.clone(),
        fetcher,
        Arc::new(SystemTimeProvider),
        config.registry.clone(),
    ));

    // 3. Development simulation (skips provisioning)
    if let Some(dir) = &config.dev_simulation_dir {
        let id = SimulationId::nil();
        info!(sim_id = %id, dir = %dir.display(), "Starting development simulation");

        let factory = launcher.factory_for(&id, dir);
        registry
            .spawn(&id, factory.as_ref())
            .await
            .context("Failed to start development simulation")?;
    }

    // 4. Start JSON-RPC server
    info!("Starting JSON-RPC server...");
    let rpc_server = RpcServer::new(
        RpcServerConfig {
            host: config.rpc_host.clone(),
            port: config.rpc_port,
        },
        RpcHandler::new(
            registry.clone(),
            launcher,
            Arc::new(UuidProvider),
            groups,
            config.backends_dir.clone(),
        ),
    );
    let (addr, rpc_handle) = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %addr, "System ready. Waiting for requests...");
    info!("Press Ctrl+C to shutdown");

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 6. Graceful shutdown: stop accepting requests, then stop every simulation
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server was already stopped");
    }
    let stopped = registry.shutdown().await;
    rpc_handle.stopped().await;

    info!(simulations = stopped, "Shutdown complete.");

    Ok(())
}
