//! MCP error types.

use std::time::Duration;
use thiserror::Error;
use toolwire_container::ContainerError;

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Worker executable missing or failed to launch.
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// Named container is missing or not running.
    #[error("Container unavailable: {container} is {state}")]
    ContainerUnavailable { container: String, state: String },

    /// Write to a closed or broken channel.
    #[error("Transport write failed: {0}")]
    Write(String),

    /// One malformed inbound message. Recoverable.
    #[error("Protocol parse error: {0}")]
    ProtocolParse(String),

    /// The worker answered a tool call with a JSON-RPC error.
    #[error("{message}")]
    ToolInvocation { code: i64, message: String },

    /// Call attempted before the handshake completed.
    #[error("Client not initialized: {0}")]
    NotInitialized(String),

    /// The transport ended while the request was outstanding.
    #[error("Transport closed")]
    TransportClosed,

    /// Handshake failed.
    #[error("Server initialization failed: {0}")]
    InitializationFailed(String),

    /// Well-formed JSON that does not follow the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No response within the configured request timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Unknown logical server name.
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// Operation not valid in the client's current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Container engine error.
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Create a spawn error.
    pub fn spawn(message: impl Into<String>) -> Self {
        Self::Spawn(message.into())
    }

    /// Create a write error.
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write(message.into())
    }

    /// Create a protocol error.
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a tool invocation error.
    pub fn tool_invocation(code: i64, message: impl Into<String>) -> Self {
        Self::ToolInvocation {
            code,
            message: message.into(),
        }
    }

    /// Create a container unavailable error.
    pub fn container_unavailable(container: impl Into<String>, state: impl ToString) -> Self {
        Self::ContainerUnavailable {
            container: container.into(),
            state: state.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the client that produced this error is still usable.
    ///
    /// Tool errors, timeouts and single bad messages affect one call only.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ToolInvocation { .. }
                | Self::ProtocolParse(_)
                | Self::Timeout(_)
                | Self::NotInitialized(_)
                | Self::Protocol(_)
        )
    }
}
