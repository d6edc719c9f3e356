//! MCP client implementation.
//!
//! One [`McpClient`] drives one worker over one [`Transport`]: it performs the
//! handshake, correlates responses with outstanding requests by id, and
//! unwraps tool results.

use crate::diagnostics;
use crate::error::{McpError, McpResult};
use crate::output::ToolOutput;
use crate::pending::PendingRequests;
use crate::protocol::{
    methods, CallToolParams, IncomingRequest, InitializeParams, InitializeResult,
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    McpTool, METHOD_NOT_FOUND,
};
use crate::transport::{Transport, TransportEvent, TransportKind};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the worker notification channel.
const NOTIFICATION_CAPACITY: usize = 64;

/// Per-client tuning.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Give up on a request after this long. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl ClientOptions {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Lifecycle of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    NotStarted,
    Starting,
    Initialized,
    Stopped,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Starting => write!(f, "starting"),
            Self::Initialized => write!(f, "initialized"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// A notification pushed by a worker.
#[derive(Debug, Clone)]
pub struct ServerNotification {
    pub server: String,
    pub method: String,
    pub params: Option<Value>,
}

/// State shared between the client and its dispatcher task.
struct Shared {
    name: String,
    transport: Arc<dyn Transport>,
    state: RwLock<ClientState>,
    pending: PendingRequests,
    notifications: broadcast::Sender<ServerNotification>,
}

impl Shared {
    async fn handle_message(&self, value: Value) {
        let message = match JsonRpcMessage::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                warn!(server = %self.name, error = %e, "Ignoring invalid message");
                return;
            }
        };

        match message {
            JsonRpcMessage::Response(response) => {
                let id = response.id;
                if !self.pending.resolve(response).await {
                    warn!(server = %self.name, id, "Dropping response for unknown request id");
                }
            }
            JsonRpcMessage::Notification(notification) => {
                debug!(server = %self.name, method = %notification.method, "Worker notification");
                // No subscribers is fine.
                let _ = self.notifications.send(ServerNotification {
                    server: self.name.clone(),
                    method: notification.method,
                    params: notification.params,
                });
            }
            JsonRpcMessage::Request(request) => self.reject_request(request),
        }
    }

    /// The client serves no methods; answer worker requests with an error.
    fn reject_request(&self, request: IncomingRequest) {
        warn!(server = %self.name, method = %request.method, "Rejecting worker request");

        let reply = json!({
            "jsonrpc": "2.0",
            "id": request.id,
            "error": {
                "code": METHOD_NOT_FOUND,
                "message": format!("Method not found: {}", request.method),
            },
        });
        let transport = self.transport.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let result = match serde_json::to_vec(&reply) {
                Ok(bytes) => transport.write(&bytes).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                debug!(server = %name, error = %e, "Failed to answer worker request");
            }
        });
    }

    async fn on_closed(&self, reason: Option<String>) {
        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, ClientState::Stopped)
        };

        let failed = self.pending.fail_all().await;
        if previous != ClientState::Stopped {
            match reason {
                Some(reason) => {
                    error!(server = %self.name, reason = %reason, failed, "Worker connection lost")
                }
                None => warn!(server = %self.name, failed, "Worker connection closed"),
            }
        }
    }
}

async fn dispatch(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    let reason = loop {
        match events.recv().await {
            Some(TransportEvent::Message(value)) => shared.handle_message(value).await,
            Some(TransportEvent::Diagnostic(diagnostic)) => {
                diagnostics::emit(&shared.name, &diagnostic)
            }
            Some(TransportEvent::Closed(reason)) => break reason,
            None => break None,
        }
    };
    shared.on_closed(reason).await;
}

/// MCP client for a single worker.
pub struct McpClient {
    shared: Arc<Shared>,
    options: ClientOptions,
    tools: RwLock<Vec<McpTool>>,
    server_info: RwLock<Option<InitializeResult>>,
    dispatcher: std::sync::Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for McpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Create a client. Nothing is launched until [`McpClient::start`].
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        options: ClientOptions,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                transport,
                state: RwLock::new(ClientState::NotStarted),
                pending: PendingRequests::new(),
                notifications,
            }),
            options,
            tools: RwLock::new(Vec::new()),
            server_info: RwLock::new(None),
            dispatcher: std::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Logical server name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.shared.transport.kind()
    }

    pub async fn state(&self) -> ClientState {
        *self.shared.state.read().await
    }

    /// Get the next request ID.
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Launch the worker and run the MCP handshake.
    ///
    /// Sends `initialize`, then `notifications/initialized`, then
    /// `tools/list`. On any failure the transport is closed, the client ends
    /// up [`ClientState::Stopped`] and the error is returned.
    pub async fn start(&self) -> McpResult<()> {
        {
            let mut state = self.shared.state.write().await;
            match *state {
                ClientState::NotStarted => *state = ClientState::Starting,
                ClientState::Initialized => return Ok(()),
                other => {
                    return Err(McpError::InvalidState(format!(
                        "cannot start client {} while {other}",
                        self.name()
                    )))
                }
            }
        }

        info!(server = %self.name(), transport = %self.transport_kind(), "Starting MCP client");

        if let Err(e) = self.handshake().await {
            error!(server = %self.name(), error = %e, "MCP handshake failed");
            if let Err(close_err) = self.shutdown().await {
                debug!(server = %self.name(), error = %close_err, "Failed to close transport");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn handshake(&self) -> McpResult<()> {
        let events = self.shared.transport.start().await?;
        let handle = tokio::spawn(dispatch(self.shared.clone(), events));
        if let Ok(mut slot) = self.dispatcher.lock() {
            *slot = Some(handle);
        }

        let params = serde_json::to_value(InitializeParams::default())?;
        let result = self
            .send_request(methods::INITIALIZE, Some(params))
            .await?
            .into_result()
            .map_err(|e| McpError::InitializationFailed(e.message))?;
        let init_result: InitializeResult = serde_json::from_value(result).map_err(|e| {
            McpError::InitializationFailed(format!("invalid initialize result: {e}"))
        })?;

        debug!(
            server = %self.name(),
            protocol_version = %init_result.protocol_version,
            server_name = %init_result.server_info.name,
            "MCP server initialized"
        );

        self.notify(methods::INITIALIZED, None).await?;

        let result = self
            .send_request(methods::TOOLS_LIST, None)
            .await?
            .into_result()
            .map_err(|e| McpError::InitializationFailed(format!("tools/list: {}", e.message)))?;
        let tools = parse_tools(result)?;

        let tool_count = tools.len();
        *self.tools.write().await = tools;
        *self.server_info.write().await = Some(init_result);

        {
            let mut state = self.shared.state.write().await;
            if *state != ClientState::Starting {
                return Err(McpError::TransportClosed);
            }
            *state = ClientState::Initialized;
        }

        info!(server = %self.name(), tool_count, "Discovered MCP tools");
        Ok(())
    }

    /// Call a tool and unwrap its result.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> McpResult<ToolOutput> {
        self.ensure_initialized().await?;

        debug!(server = %self.name(), tool = %tool, "Calling MCP tool");

        let params = serde_json::to_value(CallToolParams {
            name: tool.to_string(),
            arguments,
        })?;
        let response = self.send_request(methods::TOOLS_CALL, Some(params)).await?;

        match response.into_result() {
            Ok(result) => Ok(ToolOutput::from_result(result)),
            Err(e) => {
                warn!(
                    server = %self.name(),
                    tool = %tool,
                    code = e.code,
                    error = %e.message,
                    "Tool call failed"
                );
                Err(McpError::tool_invocation(e.code, e.message))
            }
        }
    }

    /// Cached tool descriptors from the last `tools/list`.
    pub async fn tools(&self) -> Vec<McpTool> {
        self.tools.read().await.clone()
    }

    pub async fn has_tool(&self, tool: &str) -> bool {
        self.tools.read().await.iter().any(|t| t.name == tool)
    }

    /// Re-run `tools/list` and replace the cache.
    pub async fn refresh_tools(&self) -> McpResult<Vec<McpTool>> {
        self.ensure_initialized().await?;

        let result = self
            .send_request(methods::TOOLS_LIST, None)
            .await?
            .into_result()
            .map_err(|e| McpError::protocol_error(format!("tools/list failed: {}", e.message)))?;
        let tools = parse_tools(result)?;

        *self.tools.write().await = tools.clone();
        debug!(server = %self.name(), tool_count = tools.len(), "Refreshed MCP tools");
        Ok(tools)
    }

    /// The worker's `initialize` result, once the handshake has completed.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.read().await.clone()
    }

    /// Receive notifications pushed by the worker.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerNotification> {
        self.shared.notifications.subscribe()
    }

    /// Number of requests waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.shared.pending.len().await
    }

    /// Stop the worker. Outstanding requests fail with
    /// [`McpError::TransportClosed`].
    pub async fn stop(&self) -> McpResult<()> {
        if self.state().await == ClientState::Stopped {
            return Ok(());
        }
        self.shutdown().await
    }

    async fn shutdown(&self) -> McpResult<()> {
        *self.shared.state.write().await = ClientState::Stopped;

        let result = self.shared.transport.close().await;

        let failed = self.shared.pending.fail_all().await;
        if failed > 0 {
            warn!(server = %self.name(), failed, "Rejected outstanding requests");
        }

        if let Ok(mut slot) = self.dispatcher.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }

        info!(server = %self.name(), "MCP client stopped");
        result
    }

    async fn ensure_initialized(&self) -> McpResult<()> {
        match self.state().await {
            ClientState::Initialized => Ok(()),
            ClientState::Stopped => Err(McpError::TransportClosed),
            ClientState::NotStarted | ClientState::Starting => {
                Err(McpError::NotInitialized(self.name().to_string()))
            }
        }
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<JsonRpcResponse> {
        let id = self.next_request_id();
        let payload = serde_json::to_vec(&JsonRpcRequest::new(id, method, params))?;

        let rx = self.shared.pending.insert(id).await?;

        // A stop racing with this call must not leave the entry behind.
        if self.state().await == ClientState::Stopped {
            self.shared.pending.remove(id).await;
            return Err(McpError::TransportClosed);
        }

        debug!(server = %self.name(), id, method = %method, "Sending request");

        if let Err(e) = self.shared.transport.write(&payload).await {
            self.shared.pending.remove(id).await;
            return Err(e);
        }

        let outcome = match self.options.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.shared.pending.remove(id).await;
                    warn!(server = %self.name(), id, method = %method, "Request timed out");
                    return Err(McpError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => Err(McpError::TransportClosed),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        let payload = serde_json::to_vec(&JsonRpcNotification::new(method, params))?;
        debug!(server = %self.name(), method = %method, "Sending notification");
        self.shared.transport.write(&payload).await
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.dispatcher.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

fn parse_tools(result: Value) -> McpResult<Vec<McpTool>> {
    let list: ListToolsResult = serde_json::from_value(result)
        .map_err(|e| McpError::protocol_error(format!("invalid tools/list result: {e}")))?;
    Ok(list.tools)
}
