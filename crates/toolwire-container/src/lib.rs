//! Container engine access for toolwire.
//!
//! Workers in production run inside long-lived containers that are
//! provisioned elsewhere. This crate only needs two things from the engine:
//!
//! - the state of a named container, so callers can refuse to talk to one
//!   that is not running
//! - an attached, interactive exec session inside it
//!
//! The exec output is exposed as raw bytes in the engine's multiplexed
//! format (see [`frame`]), so every consumer decodes it the same way.
//!
//! # Example
//!
//! ```rust,no_run
//! use toolwire_container::{ContainerRuntime, DockerRuntime, ExecSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = DockerRuntime::connect(None).await?;
//!
//!     if runtime.is_running("toolwire-monitoring").await? {
//!         let spec = ExecSpec::new(["python", "-u", "server.py"]).with_working_dir("/app");
//!         let _session = runtime.exec_attached("toolwire-monitoring", &spec).await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod frame;
pub mod runtime;

pub use error::{ContainerError, ContainerResult};
pub use frame::{encode_frame, Frame, FrameCodec, StreamKind, HEADER_LEN};
pub use runtime::DockerRuntime;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::pin::Pin;
use tokio::io::AsyncWrite;

/// Lifecycle state of a container as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// No container with that name exists
    Missing,
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    /// The engine reported a state we do not know about
    Unknown,
}

impl ContainerState {
    /// Check if commands can be executed in the container.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Restarting => write!(f, "restarting"),
            Self::Removing => write!(f, "removing"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Command to run in an exec session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecSpec {
    /// Program and arguments
    pub command: Vec<String>,
    /// Working directory inside the container
    pub working_dir: Option<String>,
    /// Extra environment, `KEY=value`
    pub env: Vec<String>,
}

impl ExecSpec {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env.push(format!("{}={}", key.as_ref(), value.as_ref()));
        self
    }
}

/// An attached exec session.
pub struct ExecSession {
    /// Multiplexed output, chunked arbitrarily
    pub output: BoxStream<'static, ContainerResult<Bytes>>,
    /// Process stdin
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Access to a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Get the state of a named container.
    ///
    /// Returns [`ContainerState::Missing`] rather than an error when the
    /// container does not exist.
    async fn state(&self, container: &str) -> ContainerResult<ContainerState>;

    /// Check if a named container is running.
    async fn is_running(&self, container: &str) -> ContainerResult<bool> {
        Ok(self.state(container).await?.is_running())
    }

    /// Start an interactive exec session with stdin, stdout and stderr attached.
    async fn exec_attached(
        &self,
        container: &str,
        spec: &ExecSpec,
    ) -> ContainerResult<ExecSession>;
}
