//! Container exec transport (multiplexed frames over an attached exec).

use super::{forward, Transport, TransportEvent, TransportKind};
use crate::codec::{InboundDecoder, MultiplexedDecoder};
use crate::error::{McpError, McpResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use toolwire_container::{encode_frame, ContainerRuntime, ExecSpec, StreamKind};
use tracing::{debug, info, warn};

/// How to run a worker inside a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerExecConfig {
    /// Container name or id
    pub container: String,
    /// Program and arguments
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    /// Wrap stdin writes in stream-type-0 frames
    pub frame_stdin: bool,
}

impl ContainerExecConfig {
    pub fn new<I, S>(container: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            container: container.into(),
            command: command.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: HashMap::new(),
            frame_stdin: true,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_frame_stdin(mut self, frame_stdin: bool) -> Self {
        self.frame_stdin = frame_stdin;
        self
    }

    fn exec_spec(&self) -> ExecSpec {
        let mut spec = ExecSpec::new(self.command.iter().cloned());
        if let Some(dir) = &self.working_dir {
            spec = spec.with_working_dir(dir.clone());
        }
        let mut env: Vec<_> = self.env.iter().collect();
        env.sort();
        for (key, value) in env {
            spec = spec.with_env(key, value);
        }
        spec
    }
}

type ExecInput = Pin<Box<dyn AsyncWrite + Send>>;

/// Transport over an interactive exec session in an existing container.
pub struct ContainerExecTransport {
    config: ContainerExecConfig,
    runtime: Arc<dyn ContainerRuntime>,
    input: Mutex<Option<ExecInput>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    connected: Arc<AtomicBool>,
}

impl ContainerExecTransport {
    pub fn new(config: ContainerExecConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            runtime,
            input: Mutex::new(None),
            reader: Mutex::new(None),
            started: AtomicBool::new(false),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ContainerExecConfig {
        &self.config
    }

    fn encode(&self, message: &[u8]) -> McpResult<Vec<u8>> {
        let mut line = Vec::with_capacity(message.len() + 1);
        line.extend_from_slice(message);
        line.push(b'\n');

        if !self.config.frame_stdin {
            return Ok(line);
        }
        encode_frame(StreamKind::Stdin, &line)
            .map(|frame| frame.to_vec())
            .map_err(|e| McpError::write(e.to_string()))
    }
}

#[async_trait]
impl Transport for ContainerExecTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ContainerExec
    }

    async fn start(&self) -> McpResult<mpsc::UnboundedReceiver<TransportEvent>> {
        let container = &self.config.container;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(McpError::InvalidState(format!(
                "exec transport for {container} already started"
            )));
        }

        let state = self.runtime.state(container).await?;
        if !state.is_running() {
            warn!(container = %container, state = %state, "Container is not running");
            return Err(McpError::container_unavailable(container, state));
        }

        let session = self
            .runtime
            .exec_attached(container, &self.config.exec_spec())
            .await?;

        info!(container = %container, command = ?self.config.command, "Attached to worker");

        let (tx, rx) = mpsc::unbounded_channel();
        let connected = self.connected.clone();
        connected.store(true, Ordering::SeqCst);

        let name = container.clone();
        let mut output = session.output;
        let reader = tokio::spawn(async move {
            let mut decoder = MultiplexedDecoder::new();
            let mut reason = None;
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(bytes) => {
                        if !forward(decoder.feed(&bytes), &tx) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(container = %name, error = %e, "Exec output failed");
                        reason = Some(e.to_string());
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            if decoder.buffered() > 0 {
                debug!(
                    container = %name,
                    bytes = decoder.buffered(),
                    "Exec output ended mid-frame"
                );
            }
            info!(container = %name, "Exec session ended");
            let _ = tx.send(TransportEvent::Closed(reason));
        });

        *self.input.lock().await = Some(session.input);
        *self.reader.lock().await = Some(reader);

        Ok(rx)
    }

    async fn write(&self, message: &[u8]) -> McpResult<()> {
        let bytes = self.encode(message)?;

        let mut guard = self.input.lock().await;
        let input = guard
            .as_mut()
            .ok_or_else(|| McpError::write("exec stdin is closed"))?;

        let result = async {
            input.write_all(&bytes).await?;
            input.flush().await
        }
        .await;

        if let Err(e) = result {
            *guard = None;
            return Err(McpError::write(e.to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        if let Some(mut input) = self.input.lock().await.take() {
            if let Err(e) = input.shutdown().await {
                debug!(
                    container = %self.config.container,
                    error = %e,
                    "Failed to close exec stdin"
                );
            }
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
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

    #[test]
    fn test_config_defaults_to_framed_stdin() {
        let config = ContainerExecConfig::new("toolwire-monitoring", ["python", "-u", "server.py"]);
        assert!(config.frame_stdin);
        assert_eq!(config.command, vec!["python", "-u", "server.py"]);
    }

    #[test]
    fn test_exec_spec_env_is_sorted() {
        let spec = ContainerExecConfig::new("c", ["python"])
            .with_working_dir("/app")
            .with_env("B", "2")
            .with_env("A", "1")
            .exec_spec();

        assert_eq!(spec.working_dir.as_deref(), Some("/app"));
        assert_eq!(spec.env, vec!["A=1", "B=2"]);
    }
}
