//! Mock implementations for testing.
//!
//! [`MockTransport`] stands in for a worker: it records every document the
//! client writes, can answer the handshake and tool calls on its own, and
//! lets a test inject arbitrary inbound messages. [`MockTransportFactory`]
//! hands out mock transports to a `ClientManager` and counts them.

use crate::fixtures;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use toolwire_mcp::diagnostics::Diagnostic;
use toolwire_mcp::{
    McpError, McpResult, ServerEndpoint, Transport, TransportEvent, TransportFactory,
    TransportKind,
};

/// How the mock answers a `tools/call`.
#[derive(Debug, Clone)]
pub enum ToolReply {
    Result(Value),
    Error { code: i64, message: String },
}

#[derive(Default)]
struct Script {
    /// Answer initialize and tools/list automatically.
    handshake: bool,
    /// Reply to initialize with this JSON-RPC error instead.
    initialize_error: Option<(i64, String)>,
    tools: Vec<Value>,
    replies: HashMap<String, ToolReply>,
}

struct Inner {
    kind: Mutex<TransportKind>,
    script: Mutex<Script>,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    writes: Mutex<Vec<Value>>,
    written: Notify,
    start_error: Mutex<Option<String>>,
    fail_writes: AtomicBool,
    starts: AtomicUsize,
    closes: AtomicUsize,
}

/// A scriptable in-memory transport.
///
/// Cloning shares the same state, so a test can keep one handle while the
/// client owns another.
///
/// # Example
///
/// ```rust
/// use toolwire_test_utils::mocks::MockTransport;
/// use toolwire_test_utils::fixtures::text_result;
///
/// let transport = MockTransport::new()
///     .with_handshake()
///     .with_tool("ping", "Liveness check")
///     .with_tool_result("ping", text_result("pong"));
/// assert_eq!(transport.write_count(), 0);
/// ```
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    /// Create a mock that answers nothing on its own.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                kind: Mutex::new(TransportKind::LocalProcess),
                script: Mutex::new(Script::default()),
                events: Mutex::new(None),
                writes: Mutex::new(Vec::new()),
                written: Notify::new(),
                start_error: Mutex::new(None),
                fail_writes: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    /// Answer `initialize` and `tools/list` automatically.
    pub fn with_handshake(self) -> Self {
        self.inner.script.lock().unwrap().handshake = true;
        self
    }

    /// Answer `initialize` with a JSON-RPC error.
    pub fn with_initialize_error(self, code: i64, message: &str) -> Self {
        {
            let mut script = self.inner.script.lock().unwrap();
            script.handshake = true;
            script.initialize_error = Some((code, message.to_string()));
        }
        self
    }

    /// Advertise a tool in `tools/list`.
    pub fn with_tool(self, name: &str, description: &str) -> Self {
        self.inner
            .script
            .lock()
            .unwrap()
            .tools
            .push(fixtures::tool(name, description));
        self
    }

    /// Answer calls to `tool` with `result`.
    pub fn with_tool_result(self, tool: &str, result: Value) -> Self {
        self.inner
            .script
            .lock()
            .unwrap()
            .replies
            .insert(tool.to_string(), ToolReply::Result(result));
        self
    }

    /// Answer calls to `tool` with a JSON-RPC error.
    pub fn with_tool_error(self, tool: &str, code: i64, message: &str) -> Self {
        self.inner.script.lock().unwrap().replies.insert(
            tool.to_string(),
            ToolReply::Error {
                code,
                message: message.to_string(),
            },
        );
        self
    }

    /// Make `start` fail with a spawn error.
    pub fn with_start_error(self, message: &str) -> Self {
        *self.inner.start_error.lock().unwrap() = Some(message.to_string());
        self
    }

    /// Report a different transport kind.
    pub fn with_kind(self, kind: TransportKind) -> Self {
        *self.inner.kind.lock().unwrap() = kind;
        self
    }

    /// Advertise another tool from the next `tools/list` on.
    pub fn add_tool(&self, name: &str, description: &str) {
        self.inner
            .script
            .lock()
            .unwrap()
            .tools
            .push(fixtures::tool(name, description));
    }

    /// Make every following write fail.
    pub fn fail_writes(&self) {
        self.inner.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Deliver an inbound JSON document to the client.
    pub fn push(&self, message: Value) {
        self.send(TransportEvent::Message(message));
    }

    /// Deliver a success response.
    pub fn respond(&self, id: u64, result: Value) {
        self.push(fixtures::response(id, result));
    }

    /// Deliver an error response.
    pub fn respond_error(&self, id: u64, code: i64, message: &str) {
        self.push(fixtures::error_response(id, code, message));
    }

    /// Deliver a stderr line.
    pub fn diagnostic(&self, line: &str) {
        self.send(TransportEvent::Diagnostic(Diagnostic::from_line(line)));
    }

    /// Simulate the worker going away.
    pub fn close_stream(&self, reason: Option<&str>) {
        self.send(TransportEvent::Closed(reason.map(str::to_string)));
        self.inner.events.lock().unwrap().take();
    }

    /// Every document written so far.
    pub fn writes(&self) -> Vec<Value> {
        self.inner.writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.inner.writes.lock().unwrap().len()
    }

    /// Written documents whose `method` is `method`.
    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.writes()
            .into_iter()
            .filter(|w| w["method"] == method)
            .collect()
    }

    /// Wait until at least `count` documents with `method` have been written.
    ///
    /// Panics after five seconds.
    pub async fn wait_for_requests(&self, method: &str, count: usize) -> Vec<Value> {
        let wait = async {
            loop {
                let notified = self.inner.written.notified();
                let found = self.requests(method);
                if found.len() >= count {
                    return found;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {count} {method} request(s)"))
    }

    pub fn start_count(&self) -> usize {
        self.inner.starts.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    fn send(&self, event: TransportEvent) {
        if let Some(tx) = self.inner.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn auto_reply(&self, message: &Value) -> Option<Value> {
        let id = message.get("id").and_then(Value::as_u64)?;
        let method = message.get("method").and_then(Value::as_str)?;
        let script = self.inner.script.lock().unwrap();

        match method {
            "initialize" if script.handshake => Some(match &script.initialize_error {
                Some((code, msg)) => fixtures::error_response(id, *code, msg),
                None => fixtures::response(id, fixtures::initialize_result("mock-worker")),
            }),
            "tools/list" if script.handshake => {
                Some(fixtures::response(id, json!({"tools": script.tools})))
            }
            "tools/call" => {
                let tool = message["params"]["name"].as_str()?;
                match script.replies.get(tool)? {
                    ToolReply::Result(result) => Some(fixtures::response(id, result.clone())),
                    ToolReply::Error { code, message } => {
                        Some(fixtures::error_response(id, *code, message))
                    }
                }
            }
            _ => None,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        *self.inner.kind.lock().unwrap()
    }

    async fn start(&self) -> McpResult<mpsc::UnboundedReceiver<TransportEvent>> {
        self.inner.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.inner.start_error.lock().unwrap().clone() {
            return Err(McpError::spawn(message));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn write(&self, message: &[u8]) -> McpResult<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) || !self.is_connected() {
            return Err(McpError::write("mock transport is closed"));
        }

        let value: Value = serde_json::from_slice(message)?;
        let reply = self.auto_reply(&value);

        self.inner.writes.lock().unwrap().push(value);
        self.inner.written.notify_waiters();

        if let Some(reply) = reply {
            self.push(reply);
        }
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.events.lock().unwrap().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.events.lock().unwrap().is_some()
    }
}

type Template = dyn Fn(&str, usize) -> MockTransport + Send + Sync;

/// Hands out [`MockTransport`]s and remembers them.
///
/// The template receives the server name and how many transports were
/// already created for it.
#[derive(Clone)]
pub struct MockTransportFactory {
    template: Arc<Template>,
    created: Arc<Mutex<Vec<(String, MockTransport)>>>,
    endpoints: Arc<Mutex<Vec<ServerEndpoint>>>,
}

impl MockTransportFactory {
    pub fn new<F>(template: F) -> Self
    where
        F: Fn(&str, usize) -> MockTransport + Send + Sync + 'static,
    {
        Self {
            template: Arc::new(template),
            created: Arc::new(Mutex::new(Vec::new())),
            endpoints: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every server gets a worker that completes the handshake with `tools`.
    pub fn healthy(tools: &[&str]) -> Self {
        let tools: Vec<String> = tools.iter().map(|t| t.to_string()).collect();
        Self::new(move |_, _| {
            tools.iter().fold(MockTransport::new().with_handshake(), |t, name| {
                t.with_tool(name, "mock tool")
            })
        })
    }

    pub fn create_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    /// Transports created for `name`, oldest first.
    pub fn transports(&self, name: &str) -> Vec<MockTransport> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|(server, _)| server == name)
            .map(|(_, transport)| transport.clone())
            .collect()
    }

    /// Endpoints the manager resolved, in creation order.
    pub fn endpoints(&self) -> Vec<ServerEndpoint> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        name: &str,
        endpoint: &ServerEndpoint,
    ) -> McpResult<Arc<dyn Transport>> {
        let attempt = self.transports(name).len();
        let transport = (self.template)(name, attempt);
        self.created
            .lock()
            .unwrap()
            .push((name.to_string(), transport.clone()));
        self.endpoints.lock().unwrap().push(endpoint.clone());
        Ok(Arc::new(transport))
    }
}
