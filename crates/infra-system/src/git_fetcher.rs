// Git CLI source fetcher
// reason: shelling out to git keeps credential helpers, proxies and protocols identical to the host
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use simrunner_core::domain::ProvisioningSpec;
use simrunner_core::port::{FetchError, ProgressObserver, SourceFetcher};

/// stderr lines kept for the error detail of a failed clone
const ERROR_TAIL_LINES: usize = 20;

/// Environment passed to git when no allowlist is configured
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "SSH_AUTH_SOCK",
    "GIT_SSH_COMMAND",
    "HTTPS_PROXY",
    "HTTP_PROXY",
    "NO_PROXY",
];

/// Clones branches with the `git` executable
pub struct GitCliFetcher {
    git_bin: String,
    env_allowlist: Vec<String>,
    clone_timeout: Option<Duration>,
}

impl Default for GitCliFetcher {
    fn default() -> Self {
        Self::new(
            "git",
            DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
            None,
        )
    }
}

impl GitCliFetcher {
    /// Create a fetcher
    ///
    /// # Arguments
    /// * `git_bin` - git executable (name resolved through PATH, or absolute path)
    /// * `env_allowlist` - host environment variables passed through to git
    /// * `clone_timeout` - abort the clone after this long (None = no limit)
    pub fn new(
        git_bin: impl Into<String>,
        env_allowlist: Vec<String>,
        clone_timeout: Option<Duration>,
    ) -> Self {
        Self {
            git_bin: git_bin.into(),
            env_allowlist,
            clone_timeout,
        }
    }

    /// Host environment restricted to the allowlist
    fn filter_env(&self, env: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
        env.filter(|(k, _)| self.env_allowlist.contains(k)).collect()
    }

    fn build_command(&self, spec: &ProvisioningSpec) -> Command {
        let mut cmd = Command::new(&self.git_bin);
        cmd.arg("clone")
            .arg("--progress")
            .arg("--branch")
            .arg(spec.branch())
            .arg("--single-branch")
            .arg("--")
            .arg(spec.source_url())
            .arg(spec.target_dir())
            .env_clear()
            .envs(self.filter_env(std::env::vars()))
            // Never block on an interactive credential prompt
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn clone_branch(
        &self,
        spec: &ProvisioningSpec,
        progress: &dyn ProgressObserver,
    ) -> Result<(), FetchError> {
        if let Some(parent) = spec.target_dir().parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::Io(format!("{}: {}", parent.display(), e)))?;
        }

        let mut child = self
            .build_command(spec)
            .spawn()
            .map_err(|e| FetchError::SpawnFailed(format!("{}: {}", self.git_bin, e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::Io("git stderr was not captured".to_string()))?;

        let run = async {
            let tail = stream_progress(stderr, progress).await;
            let status = child.wait().await;
            (tail, status)
        };

        // On timeout the child is dropped here and killed (kill_on_drop)
        let (tail, status) = match self.clone_timeout {
            Some(limit) => timeout(limit, run)
                .await
                .map_err(|_| FetchError::Timeout(limit.as_millis() as u64))?,
            None => run.await,
        };

        let status = status.map_err(|e| FetchError::Io(e.to_string()))?;
        if status.success() {
            return Ok(());
        }

        let mut detail = tail.into_iter().collect::<Vec<_>>().join("\n");
        if detail.is_empty() {
            detail = format!("git exited with {}", status);
        }
        Err(FetchError::Failed {
            code: status.code(),
            detail,
        })
    }
}

#[async_trait]
impl SourceFetcher for GitCliFetcher {
    async fn fetch(
        &self,
        spec: &ProvisioningSpec,
        progress: &dyn ProgressObserver,
    ) -> Result<(), FetchError> {
        info!(
            git = %self.git_bin,
            url = %spec.source_url(),
            branch = %spec.branch(),
            timeout_ms = ?self.clone_timeout.map(|t| t.as_millis()),
            "Starting git clone"
        );

        let result = self.clone_branch(spec, progress).await;
        if let Err(e) = &result {
            warn!(url = %spec.source_url(), error = %e, "git clone failed");
        }
        result
    }
}

/// Whether a stderr line is a progress report rather than a diagnostic
///
/// Accepts `Cloning into ...` and `[remote: ]<stage>: NN% (a/b)...` or
/// `<stage>: <count>`.
fn is_progress_line(line: &str) -> bool {
    if line.starts_with("Cloning into") {
        return true;
    }
    let line = line.strip_prefix("remote: ").unwrap_or(line);
    let Some((stage, rest)) = line.split_once(':') else {
        return false;
    };
    let stage_ok = !stage.is_empty()
        && stage.chars().all(|c| c.is_ascii_alphabetic() || c == ' ')
        && !matches!(stage, "fatal" | "error" | "warning" | "hint");
    stage_ok && rest.trim_start().starts_with(|c: char| c.is_ascii_digit())
}

/// Forward git's progress lines, returning the last lines seen of any kind
async fn stream_progress<R>(mut reader: R, progress: &dyn ProgressObserver) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::default();
    let mut tail = VecDeque::with_capacity(ERROR_TAIL_LINES);
    let mut buf = [0u8; 4096];

    let mut emit = |line: String, tail: &mut VecDeque<String>| {
        if is_progress_line(&line) {
            progress.on_progress(&line);
        } else {
            debug!(line = %line, "git output");
        }
        if tail.len() == ERROR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    };

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    emit(line, &mut tail);
                }
            }
            Err(e) => {
                debug!(error = %e, "Stopped reading git progress");
                break;
            }
        }
    }
    if let Some(line) = splitter.finish() {
        emit(line, &mut tail);
    }

    tail
}

/// Splits a byte stream on `\r` and `\n`
///
/// git redraws progress counters with bare carriage returns, so every
/// redraw becomes its own line.
#[derive(Default)]
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\r' || byte == b'\n' {
                if let Some(line) = self.take_line() {
                    lines.push(line);
                }
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        self.take_line()
    }

    fn take_line(&mut self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        (!line.is_empty()).then_some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectProgress {
        lines: Mutex<Vec<String>>,
    }

    impl ProgressObserver for CollectProgress {
        fn on_progress(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn test_splitter_handles_carriage_returns() {
        let mut splitter = LineSplitter::default();

        let lines = splitter
            .push(b"Cloning into 'x'...\nReceiving objects:  10%\rReceiving objects:  55%\r");
        assert_eq!(
            lines,
            vec![
                "Cloning into 'x'...",
                "Receiving objects:  10%",
                "Receiving objects:  55%",
            ]
        );
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_splitter_joins_across_chunks() {
        let mut splitter = LineSplitter::default();

        assert!(splitter.push(b"remote: Counting obj").is_empty());
        assert_eq!(splitter.push(b"ects: 4\r\n"), vec!["remote: Counting objects: 4"]);
        assert!(splitter.push(b"\r\n\n").is_empty());
        assert!(splitter.push(b"done").is_empty());
        assert_eq!(splitter.finish(), Some("done".to_string()));
    }

    #[tokio::test]
    async fn test_stream_progress_keeps_tail() {
        let progress = CollectProgress::default();
        let input: String = (0..30)
            .map(|i| format!("Receiving objects: {}% ({}/30)\r", i * 3, i))
            .collect();

        let tail = stream_progress(input.as_bytes(), &progress).await;

        assert_eq!(progress.lines.lock().unwrap().len(), 30);
        assert_eq!(tail.len(), ERROR_TAIL_LINES);
        assert_eq!(
            tail.front().map(String::as_str),
            Some("Receiving objects: 30% (10/30)")
        );
        assert_eq!(
            tail.back().map(String::as_str),
            Some("Receiving objects: 87% (29/30)")
        );
    }

    #[test]
    fn test_progress_line_classification() {
        assert!(is_progress_line("Cloning into '/srv/backends/sim-1'..."));
        assert!(is_progress_line("Receiving objects:  55% (11/20)"));
        assert!(is_progress_line("remote: Counting objects: 100% (4/4), done."));
        assert!(is_progress_line("remote: Enumerating objects: 4, done."));

        assert!(!is_progress_line("git: 'remote-bad' is not a git command. See 'git --help'."));
        assert!(!is_progress_line("The most similar command is"));
        assert!(!is_progress_line("\tremote-fd"));
        assert!(!is_progress_line("fatal: Remote branch nope not found in upstream origin"));
        assert!(!is_progress_line("fatal: 128 reasons"));
    }

    #[tokio::test]
    async fn test_diagnostics_stay_out_of_progress() {
        let progress = CollectProgress::default();
        let input = "Cloning into 'sim-2'...\n\
                     git: 'remote-bad' is not a git command. See 'git --help'.\n\
                     \n\
                     The most similar command is\n\
                     \tremote-fd\n";

        let tail = stream_progress(input.as_bytes(), &progress).await;

        assert_eq!(
            *progress.lines.lock().unwrap(),
            vec!["Cloning into 'sim-2'...".to_string()]
        );
        assert_eq!(tail.len(), 4);
        assert_eq!(tail.back().map(String::as_str), Some("\tremote-fd"));
    }

    #[test]
    fn test_filter_env_allowlist() {
        let fetcher = GitCliFetcher::new("git", vec!["PATH".to_string()], None);
        let env = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("SECRET_TOKEN".to_string(), "hunter2".to_string()),
        ];

        let filtered = fetcher.filter_env(env.into_iter());

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get("PATH").map(String::as_str), Some("/usr/bin"));
    }

    #[tokio::test]
    async fn test_missing_git_binary() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = GitCliFetcher::new(
            "/nonexistent/bin/git-does-not-exist",
            vec!["PATH".to_string()],
            None,
        );
        let spec = ProvisioningSpec::new(
            "https://example.com/sim.git",
            "main",
            dir.path().join("backends/sim-1"),
        )
        .unwrap();

        let err = fetcher
            .fetch(&spec, &CollectProgress::default())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::SpawnFailed(_)));
        // Parent directory is prepared before git runs
        assert!(dir.path().join("backends").is_dir());
    }

    #[tokio::test]
    async fn test_bad_url_fails() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = GitCliFetcher::new(
            "git",
            vec!["PATH".to_string(), "HOME".to_string()],
            Some(Duration::from_secs(30)),
        );
        let spec = ProvisioningSpec::new(
            "bad://nonexistent",
            "main",
            dir.path().join("sim-2"),
        )
        .unwrap();

        let err = fetcher
            .fetch(&spec, &CollectProgress::default())
            .await
            .unwrap_err();

        // SpawnFailed when git is not installed on the test host
        assert!(matches!(
            err,
            FetchError::Failed { .. } | FetchError::SpawnFailed(_)
        ));
        assert!(!dir.path().join("sim-2").join(".git").exists());
    }
}
