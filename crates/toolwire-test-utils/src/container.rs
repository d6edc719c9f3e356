//! In-memory container runtime.
//!
//! [`FakeContainerRuntime`] reports configurable container states and opens
//! exec sessions backed by channels, so the container exec transport can be
//! tested without an engine. Each session is exposed to the test as a
//! [`FakeExec`] that plays the worker side.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::channel::mpsc as fmpsc;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::Notify;
use tokio_util::codec::Decoder;
use toolwire_container::{
    encode_frame, ContainerError, ContainerResult, ContainerRuntime, ContainerState, ExecSession,
    ExecSpec, Frame, FrameCodec, StreamKind,
};

const STDIN_BUFFER: usize = 64 * 1024;

#[derive(Default)]
struct RuntimeInner {
    states: Mutex<HashMap<String, ContainerState>>,
    execs: Mutex<Vec<FakeExec>>,
    exec_error: Mutex<Option<String>>,
    opened: Notify,
}

/// A container runtime that never leaves the process.
#[derive(Clone, Default)]
pub struct FakeContainerRuntime {
    inner: Arc<RuntimeInner>,
}

impl FakeContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `container` as running.
    pub fn with_running(self, container: &str) -> Self {
        self.with_state(container, ContainerState::Running)
    }

    /// Report `container` in `state`. Unlisted containers are missing.
    pub fn with_state(self, container: &str, state: ContainerState) -> Self {
        self.inner
            .states
            .lock()
            .unwrap()
            .insert(container.to_string(), state);
        self
    }

    /// Make exec creation fail.
    pub fn with_exec_error(self, message: &str) -> Self {
        *self.inner.exec_error.lock().unwrap() = Some(message.to_string());
        self
    }

    /// Sessions opened so far.
    pub fn execs(&self) -> Vec<FakeExec> {
        self.inner.execs.lock().unwrap().clone()
    }

    /// Wait for the `index`-th exec session (zero-based).
    ///
    /// Panics after five seconds.
    pub async fn exec(&self, index: usize) -> FakeExec {
        let wait = async {
            loop {
                let opened = self.inner.opened.notified();
                if let Some(exec) = self.execs().get(index) {
                    return exec.clone();
                }
                opened.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("no exec session #{index} was opened"))
    }
}

#[async_trait]
impl ContainerRuntime for FakeContainerRuntime {
    async fn state(&self, container: &str) -> ContainerResult<ContainerState> {
        Ok(self
            .inner
            .states
            .lock()
            .unwrap()
            .get(container)
            .copied()
            .unwrap_or(ContainerState::Missing))
    }

    async fn exec_attached(
        &self,
        container: &str,
        spec: &ExecSpec,
    ) -> ContainerResult<ExecSession> {
        if let Some(message) = self.inner.exec_error.lock().unwrap().clone() {
            return Err(ContainerError::exec_failed(container, message));
        }

        let (output_tx, output_rx) = fmpsc::unbounded::<ContainerResult<Bytes>>();
        let (client_end, worker_end) = tokio::io::duplex(STDIN_BUFFER);

        let exec = FakeExec {
            container: container.to_string(),
            spec: spec.clone(),
            output: output_tx,
            stdin: Arc::new(tokio::sync::Mutex::new(StdinReader {
                stream: worker_end,
                buffer: BytesMut::new(),
                codec: FrameCodec::new(),
            })),
        };
        self.inner.execs.lock().unwrap().push(exec);
        self.inner.opened.notify_waiters();

        Ok(ExecSession {
            output: output_rx.boxed(),
            input: Box::pin(client_end),
        })
    }
}

struct StdinReader {
    stream: DuplexStream,
    buffer: BytesMut,
    codec: FrameCodec,
}

impl StdinReader {
    async fn fill(&mut self) -> bool {
        let mut chunk = [0u8; 4096];
        match self.stream.read(&mut chunk).await {
            Ok(0) | Err(_) => false,
            Ok(n) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                true
            }
        }
    }
}

/// The worker side of one fake exec session.
#[derive(Clone)]
pub struct FakeExec {
    pub container: String,
    pub spec: ExecSpec,
    output: fmpsc::UnboundedSender<ContainerResult<Bytes>>,
    stdin: Arc<tokio::sync::Mutex<StdinReader>>,
}

impl FakeExec {
    /// Send raw bytes as one output chunk.
    pub fn send_raw(&self, bytes: impl Into<Bytes>) {
        let _ = self.output.unbounded_send(Ok(bytes.into()));
    }

    /// Send `payload` as one stdout frame.
    pub fn send_stdout(&self, payload: &[u8]) {
        self.send_frame(StreamKind::Stdout, payload);
    }

    /// Send `text` as one stderr frame.
    pub fn send_stderr(&self, text: &str) {
        self.send_frame(StreamKind::Stderr, text.as_bytes());
    }

    /// Send a JSON document as one newline-terminated stdout frame.
    pub fn send_message(&self, message: &Value) {
        let mut line = message.to_string().into_bytes();
        line.push(b'\n');
        self.send_stdout(&line);
    }

    fn send_frame(&self, kind: StreamKind, payload: &[u8]) {
        let frame = encode_frame(kind, payload).expect("frame payload too large");
        self.send_raw(frame);
    }

    /// Fail the output stream.
    pub fn fail(&self, message: &str) {
        let _ = self
            .output
            .unbounded_send(Err(ContainerError::exec_failed(&self.container, message)));
        self.output.close_channel();
    }

    /// End the output stream as if the process exited.
    pub fn finish(&self) {
        self.output.close_channel();
    }

    /// Read the next stdin frame the client wrote.
    ///
    /// Returns `None` once stdin is closed.
    pub async fn next_frame(&self) -> Option<Frame> {
        let mut reader = self.stdin.lock().await;
        loop {
            let StdinReader { buffer, codec, .. } = &mut *reader;
            if let Some(frame) = codec.decode(buffer).expect("invalid stdin frame") {
                return Some(frame);
            }
            if !reader.fill().await {
                return None;
            }
        }
    }

    /// Read the next JSON document from framed stdin.
    pub async fn next_message(&self) -> Option<Value> {
        let frame = self.next_frame().await?;
        assert_eq!(frame.kind, StreamKind::Stdin, "stdin frame has wrong kind");
        Some(serde_json::from_slice(&frame.payload).expect("stdin frame is not JSON"))
    }

    /// Read the next newline-terminated line from unframed stdin.
    pub async fn next_line(&self) -> Option<String> {
        let mut reader = self.stdin.lock().await;
        loop {
            if let Some(pos) = reader.buffer.iter().position(|b| *b == b'\n') {
                let line = reader.buffer.split_to(pos + 1);
                return Some(String::from_utf8_lossy(&line[..pos]).into_owned());
            }
            if !reader.fill().await {
                return None;
            }
        }
    }
}
