//! Error types for container operations.

use thiserror::Error;

/// Errors that can occur while talking to the container engine.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Failed to connect to the container engine
    #[error("failed to connect to container engine: {0}")]
    ConnectionFailed(String),

    /// Named container does not exist
    #[error("container not found: {0}")]
    NotFound(String),

    /// Failed to inspect a container
    #[error("failed to inspect container '{container}': {message}")]
    InspectFailed { container: String, message: String },

    /// Failed to create or start an exec session
    #[error("exec failed in container '{container}': {message}")]
    ExecFailed { container: String, message: String },

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create an inspect failed error
    pub fn inspect_failed(container: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InspectFailed {
            container: container.into(),
            message: message.into(),
        }
    }

    /// Create an exec failed error
    pub fn exec_failed(container: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecFailed {
            container: container.into(),
            message: message.into(),
        }
    }

    /// Check if this error means the container does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;
