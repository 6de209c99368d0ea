//! Daemon configuration from `SIMRUNNER_*` environment variables

use anyhow::{Context, Result};
use simrunner_core::application::{ProvisioningFailurePolicy, RegistryConfig};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9530;
const DEFAULT_BACKENDS_DIR: &str = "~/.simrunner/backends";
const DEFAULT_WORKER_COMMAND: &str = "python3";
const DEFAULT_WORKER_ARGS: &str = "main.py";
const DEFAULT_GIT_BIN: &str = "git";
const DEFAULT_CLONE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_GROUP_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub rpc_host: String,
    pub rpc_port: u16,
    pub backends_dir: PathBuf,
    pub worker_command: String,
    pub worker_args: Vec<String>,
    pub git_bin: String,
    /// None disables the clone deadline
    pub clone_timeout: Option<Duration>,
    pub registry: RegistryConfig,
    pub group_capacity: usize,
    /// Source directory of a simulation started at boot under the nil id
    pub dev_simulation_dir: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (tests pass a map instead of the process env)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let rpc_port = match lookup("SIMRUNNER_RPC_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("SIMRUNNER_RPC_PORT is not a port: {}", raw))?,
            None => DEFAULT_RPC_PORT,
        };

        let clone_timeout_secs = match lookup("SIMRUNNER_CLONE_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("SIMRUNNER_CLONE_TIMEOUT_SECS is not a number: {}", raw))?,
            None => DEFAULT_CLONE_TIMEOUT_SECS,
        };

        let group_capacity = match lookup("SIMRUNNER_GROUP_CAPACITY") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("SIMRUNNER_GROUP_CAPACITY is not a number: {}", raw))?,
            None => DEFAULT_GROUP_CAPACITY,
        };

        let failure_policy = match lookup("SIMRUNNER_FAILURE_POLICY") {
            Some(raw) => raw
                .parse::<ProvisioningFailurePolicy>()
                .context("Invalid SIMRUNNER_FAILURE_POLICY")?,
            None => ProvisioningFailurePolicy::default(),
        };

        let log_format = match get("SIMRUNNER_LOG_FORMAT", "pretty").as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            rpc_host: get("SIMRUNNER_RPC_HOST", DEFAULT_RPC_HOST),
            rpc_port,
            backends_dir: expand_path(&get("SIMRUNNER_BACKENDS_DIR", DEFAULT_BACKENDS_DIR)),
            worker_command: get("SIMRUNNER_WORKER_COMMAND", DEFAULT_WORKER_COMMAND),
            worker_args: get("SIMRUNNER_WORKER_ARGS", DEFAULT_WORKER_ARGS)
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            git_bin: get("SIMRUNNER_GIT_BIN", DEFAULT_GIT_BIN),
            clone_timeout: (clone_timeout_secs > 0)
                .then(|| Duration::from_secs(clone_timeout_secs)),
            registry: RegistryConfig { failure_policy },
            group_capacity,
            dev_simulation_dir: lookup("SIMRUNNER_DEV_SIMULATION_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(|dir| expand_path(&dir)),
            log_format,
        })
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}
