// Subprocess-backed simulation worker
// reason: tokio::process for async pipes, nix for SIGTERM before SIGKILL
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use simrunner_core::domain::{ClientMessage, SimulationId, WorkerMessage};
use simrunner_core::port::{
    MessagingGroups, WorkerError, WorkerFactory, WorkerHandle, WorkerLauncher,
};

/// How long a worker gets to exit after SIGTERM before it is killed
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How to start a simulation process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessWorkerConfig {
    /// Executable (e.g. `python3`)
    pub program: String,
    /// Arguments, resolved relative to the simulation's source directory
    pub args: Vec<String>,
    /// Host environment variables passed through to the process
    pub env_allowlist: Vec<String>,
}

impl Default for ProcessWorkerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["main.py".to_string()],
            env_allowlist: vec![
                "PATH".to_string(),
                "HOME".to_string(),
                "USER".to_string(),
                "LANG".to_string(),
            ],
        }
    }
}

/// Builds one `ProcessWorkerFactory` per simulation
pub struct ProcessWorkerLauncher {
    config: ProcessWorkerConfig,
    groups: Arc<dyn MessagingGroups>,
}

impl ProcessWorkerLauncher {
    pub fn new(config: ProcessWorkerConfig, groups: Arc<dyn MessagingGroups>) -> Self {
        Self { config, groups }
    }
}

impl WorkerLauncher for ProcessWorkerLauncher {
    fn factory_for(&self, id: &SimulationId, source_dir: &Path) -> Arc<dyn WorkerFactory> {
        Arc::new(ProcessWorkerFactory {
            id: id.clone(),
            working_dir: source_dir.to_path_buf(),
            config: self.config.clone(),
            groups: Arc::clone(&self.groups),
        })
    }
}

/// Starts the simulation process in its source directory
pub struct ProcessWorkerFactory {
    id: SimulationId,
    working_dir: PathBuf,
    config: ProcessWorkerConfig,
    groups: Arc<dyn MessagingGroups>,
}

#[async_trait]
impl WorkerFactory for ProcessWorkerFactory {
    async fn construct(&self) -> Result<Box<dyn WorkerHandle>, WorkerError> {
        let worker = ProcessWorker::spawn(
            &self.id,
            &self.config,
            &self.working_dir,
            Arc::clone(&self.groups),
        )?;
        Ok(Box::new(worker))
    }
}

/// A running simulation process
///
/// Messages go to stdin as one JSON document per line. Each stdout line is
/// published to the simulation's group as INFO_LOG; stderr goes to the log.
pub struct ProcessWorker {
    id: SimulationId,
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exited: watch::Receiver<bool>,
    closed: AtomicBool,
}

impl ProcessWorker {
    /// Start the process and its pipe/monitor tasks
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        id: &SimulationId,
        config: &ProcessWorkerConfig,
        working_dir: &Path,
        groups: Arc<dyn MessagingGroups>,
    ) -> Result<Self, WorkerError> {
        let env: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| config.env_allowlist.contains(k))
            .collect();

        let mut child = Command::new(&config.program)
            .args(&config.args)
            .current_dir(working_dir)
            .env_clear()
            .envs(&env)
            .env("SIMRUNNER_SIM_ID", id.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WorkerError::SpawnFailed(format!(
                    "{} in {}: {}",
                    config.program,
                    working_dir.display(),
                    e
                ))
            })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_stdout(id.clone(), stdout, groups));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(id.clone(), stderr));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(false);
        tokio::spawn(monitor(id.clone(), child, kill_rx, exit_tx));

        info!(
            sim_id = %id,
            pid = ?pid,
            program = %config.program,
            args = ?config.args,
            working_dir = %working_dir.display(),
            "Worker process started"
        );

        Ok(Self {
            id: id.clone(),
            pid,
            stdin: tokio::sync::Mutex::new(stdin),
            kill_tx: Mutex::new(Some(kill_tx)),
            exited: exit_rx,
            closed: AtomicBool::new(false),
        })
    }

    fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Ask the monitor task to SIGKILL the process
    fn force_kill(&self) {
        let tx = self
            .kill_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }

    /// Send SIGTERM and wait up to GRACEFUL_SHUTDOWN_TIMEOUT for the exit
    #[cfg(unix)]
    async fn terminate_gracefully(&self) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return false;
        };

        info!(sim_id = %self.id, pid = pid, "Sending SIGTERM for graceful shutdown");
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(sim_id = %self.id, pid = pid, error = %e, "SIGTERM failed");
            return false;
        }

        let mut exited = self.exited.clone();
        let graceful = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, exited.wait_for(|e| *e))
            .await
            .is_ok();
        if !graceful {
            warn!(sim_id = %self.id, pid = pid, "Worker did not exit after SIGTERM, killing");
        }
        graceful
    }

    #[cfg(not(unix))]
    async fn terminate_gracefully(&self) -> bool {
        false
    }
}

#[async_trait]
impl WorkerHandle for ProcessWorker {
    async fn close(&self) -> Result<(), WorkerError> {
        self.closed.store(true, Ordering::SeqCst);

        // Stops the worker's input loop for processes that read until EOF
        self.stdin.lock().await.take();

        if self.has_exited() || self.terminate_gracefully().await {
            return Ok(());
        }

        self.force_kill();
        let mut exited = self.exited.clone();
        let reaped = exited.wait_for(|e| *e).await.is_ok();
        if reaped {
            Ok(())
        } else {
            Err(WorkerError::CloseFailed(format!(
                "lost track of worker process {:?}",
                self.pid
            )))
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.has_exited()
    }

    async fn send(&self, message: WorkerMessage) -> Result<(), WorkerError> {
        if self.is_closed() {
            return Err(WorkerError::Closed);
        }

        let mut line = serde_json::to_string(message.as_value())
            .map_err(|e| WorkerError::SendFailed(e.to_string()))?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        let pipe = stdin.as_mut().ok_or(WorkerError::Closed)?;
        pipe.write_all(line.as_bytes())
            .await
            .map_err(|e| WorkerError::SendFailed(e.to_string()))?;
        pipe.flush()
            .await
            .map_err(|e| WorkerError::SendFailed(e.to_string()))?;

        debug!(sim_id = %self.id, bytes = line.len(), "Message delivered to worker");
        Ok(())
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        // A dropped handle (e.g. kill with remove_only) must not leak the process
        self.force_kill();
    }
}

/// Reap the process, killing it first if asked to (or if the handle is dropped)
async fn monitor(
    id: SimulationId,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<bool>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => match child.kill().await {
            Ok(()) => child.wait().await,
            Err(e) => Err(e),
        },
    };

    match status {
        Ok(status) => info!(sim_id = %id, exit_code = ?status.code(), "Worker process exited"),
        Err(e) => warn!(sim_id = %id, error = %e, "Failed to reap worker process"),
    }
    let _ = exit_tx.send(true);
}

async fn forward_stdout(id: SimulationId, stdout: ChildStdout, groups: Arc<dyn MessagingGroups>) {
    let topic = id.topic();
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Err(e) = groups.publish(&topic, ClientMessage::InfoLog(line)) {
                    debug!(sim_id = %id, error = %e, "Dropped worker output");
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(sim_id = %id, error = %e, "Failed to read worker stdout");
                break;
            }
        }
    }
}

async fn log_stderr(id: SimulationId, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(sim_id = %id, stderr = %line, "Worker stderr");
    }
}
