//! Local subprocess transport (newline-delimited JSON over stdio).

use super::{forward, Transport, TransportEvent, TransportKind};
use crate::codec::{InboundDecoder, LineDecoder};
use crate::diagnostics::Diagnostic;
use crate::error::{McpError, McpResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

const READ_BUF_LEN: usize = 8192;

/// Interpreter used when no project-local virtualenv is found.
const SYSTEM_PYTHON: &str = "python3";

/// Virtualenv interpreters looked for under the project root, in order.
const VENV_CANDIDATES: &[&str] = &[
    ".venv/bin/python3",
    ".venv/bin/python",
    "venv/bin/python3",
    "venv/bin/python",
];

/// Pick the interpreter for local workers.
///
/// An explicit path always wins. Otherwise the first existing project-local
/// virtualenv interpreter is used, falling back to `python3` on `PATH`.
pub fn resolve_interpreter(project_root: &Path, explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    VENV_CANDIDATES
        .iter()
        .map(|candidate| project_root.join(candidate))
        .find(|path| path.is_file())
        .unwrap_or_else(|| PathBuf::from(SYSTEM_PYTHON))
}

/// How to launch a local worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProcessConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl LocalProcessConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Transport over a spawned child process.
///
/// The child is killed on [`Transport::close`] and when the transport is
/// dropped.
pub struct LocalProcessTransport {
    config: LocalProcessConfig,
    stdin: Mutex<Option<ChildStdin>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    started: AtomicBool,
    connected: Arc<AtomicBool>,
}

impl LocalProcessTransport {
    pub fn new(config: LocalProcessConfig) -> Self {
        Self {
            config,
            stdin: Mutex::new(None),
            kill: Mutex::new(None),
            started: AtomicBool::new(false),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &LocalProcessConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for LocalProcessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LocalProcess
    }

    async fn start(&self) -> McpResult<mpsc::UnboundedReceiver<TransportEvent>> {
        let mut kill_slot = self.kill.lock().await;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(McpError::InvalidState(
                "local process transport already started".to_string(),
            ));
        }

        let program = &self.config.program;
        let mut cmd = Command::new(program);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.cwd {
            cmd.current_dir(dir);
        }

        debug!(program = %program.display(), args = ?self.config.args, "Spawning worker");

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::spawn(format!("{}: {e}", program.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn("Failed to get stdin"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn("Failed to get stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::spawn("Failed to get stderr"))?;

        let pid = child.id();
        info!(program = %program.display(), pid = ?pid, "Worker started");
        self.connected.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();

        let stdout_tx = tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut decoder = LineDecoder::new();
            let mut buf = vec![0u8; READ_BUF_LEN];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if !forward(decoder.feed(&buf[..n]), &stdout_tx) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read worker stdout");
                        break;
                    }
                }
            }
            if decoder.buffered() > 0 {
                debug!(bytes = decoder.buffered(), "Worker stdout ended mid-line");
            }
        });

        let stderr_tx = tx.clone();
        let stderr_task = tokio::spawn(async move {
            // Keep draining until EOF; a closed pipe would kill the worker.
            let mut reader = BufReader::new(stderr);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Failed to read worker stderr");
                        break;
                    }
                }
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if text.trim().is_empty() {
                    continue;
                }
                let _ = stderr_tx.send(TransportEvent::Diagnostic(Diagnostic::from_line(text)));
            }
        });

        let (kill_tx, kill_rx) = oneshot::channel();
        let connected = self.connected.clone();
        tokio::spawn(async move {
            let mut requested = false;
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    requested = true;
                    if let Err(e) = child.start_kill() {
                        debug!(error = %e, "Worker already gone");
                    }
                    child.wait().await
                }
            };
            connected.store(false, Ordering::SeqCst);

            // Deliver everything the worker wrote before reporting the close.
            let _ = stdout_task.await;
            let _ = stderr_task.await;

            let reason = match status {
                Ok(status) if status.success() || requested => {
                    info!(pid = ?pid, status = %status, "Worker exited");
                    None
                }
                Ok(status) => {
                    error!(pid = ?pid, status = %status, "Worker exited with failure");
                    Some(format!("worker exited with {status}"))
                }
                Err(e) => {
                    error!(pid = ?pid, error = %e, "Failed to wait for worker");
                    Some(e.to_string())
                }
            };
            let _ = tx.send(TransportEvent::Closed(reason));
        });

        *self.stdin.lock().await = Some(stdin);
        *kill_slot = Some(kill_tx);

        Ok(rx)
    }

    async fn write(&self, message: &[u8]) -> McpResult<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| McpError::write("worker stdin is closed"))?;

        let mut line = Vec::with_capacity(message.len() + 1);
        line.extend_from_slice(message);
        line.push(b'\n');

        let result = async {
            stdin.write_all(&line).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = result {
            *guard = None;
            return Err(McpError::write(e.to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.stdin.lock().await.take();
        if let Some(kill) = self.kill.lock().await.take() {
            let _ = kill.send(());
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_interpreter_explicit_wins() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".venv/bin")).unwrap();
        fs::write(dir.path().join(".venv/bin/python3"), "").unwrap();

        let explicit = Path::new("/opt/python/bin/python3.12");
        assert_eq!(
            resolve_interpreter(dir.path(), Some(explicit)),
            explicit.to_path_buf()
        );
    }

    #[test]
    fn test_resolve_interpreter_prefers_dot_venv() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".venv/bin")).unwrap();
        fs::create_dir_all(dir.path().join("venv/bin")).unwrap();
        fs::write(dir.path().join(".venv/bin/python"), "").unwrap();
        fs::write(dir.path().join("venv/bin/python3"), "").unwrap();

        assert_eq!(
            resolve_interpreter(dir.path(), None),
            dir.path().join(".venv/bin/python")
        );
    }

    #[test]
    fn test_resolve_interpreter_falls_back_to_venv_then_system() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_interpreter(dir.path(), None), PathBuf::from("python3"));

        fs::create_dir_all(dir.path().join("venv/bin")).unwrap();
        fs::write(dir.path().join("venv/bin/python"), "").unwrap();
        assert_eq!(
            resolve_interpreter(dir.path(), None),
            dir.path().join("venv/bin/python")
        );
    }

    #[test]
    fn test_config_builder() {
        let config = LocalProcessConfig::new("python3")
            .with_args(["-u", "server.py"])
            .with_env("PYTHONUNBUFFERED", "1")
            .with_cwd("/srv/workers/monitoring");

        assert_eq!(config.args, vec!["-u", "server.py"]);
        assert_eq!(config.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
        assert_eq!(config.cwd, Some(PathBuf::from("/srv/workers/monitoring")));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let transport =
            LocalProcessTransport::new(LocalProcessConfig::new("/nonexistent/toolwire-worker"));
        let err = transport.start().await.unwrap_err();
        assert!(matches!(err, McpError::Spawn(_)), "got {err:?}");
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_write_before_start_fails() {
        let transport = LocalProcessTransport::new(LocalProcessConfig::new("python3"));
        let err = transport.write(b"{}").await.unwrap_err();
        assert!(matches!(err, McpError::Write(_)));
    }
}
