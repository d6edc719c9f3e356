//! MCP transport implementations.
//!
//! A transport moves serialized JSON-RPC documents to a worker and turns
//! whatever the worker emits back into [`TransportEvent`]s. Framing and
//! liveness checks differ per transport; everything above this layer is
//! shared.

mod container;
mod local;

pub use container::{ContainerExecConfig, ContainerExecTransport};
pub use local::{resolve_interpreter, LocalProcessConfig, LocalProcessTransport};

use crate::codec::Inbound;
use crate::diagnostics::Diagnostic;
use crate::error::McpResult;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

/// Which mechanism a transport uses to reach its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    LocalProcess,
    ContainerExec,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalProcess => write!(f, "local-process"),
            Self::ContainerExec => write!(f, "container-exec"),
        }
    }
}

/// Something the worker produced.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One complete JSON document.
    Message(Value),
    /// One classified line of worker stderr.
    Diagnostic(Diagnostic),
    /// The worker is gone. Carries a reason when it did not end cleanly.
    Closed(Option<String>),
}

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The mechanism behind this transport.
    fn kind(&self) -> TransportKind;

    /// Launch or attach to the worker.
    ///
    /// Events arrive on the returned receiver in the order the worker
    /// produced them. `Closed` is the last event; the channel may also simply
    /// end.
    async fn start(&self) -> McpResult<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Send one complete serialized JSON document.
    ///
    /// The transport appends its own framing and hands the bytes to the
    /// worker in a single write, so concurrent writes never interleave.
    async fn write(&self, message: &[u8]) -> McpResult<()>;

    /// Stop the worker or detach from it. Calling it twice is harmless.
    async fn close(&self) -> McpResult<()>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// Push decoded items to the event channel.
///
/// Returns `false` once the receiving side has gone away.
pub(crate) fn forward(items: Vec<Inbound>, tx: &mpsc::UnboundedSender<TransportEvent>) -> bool {
    for item in items {
        let event = match item {
            Inbound::Message(value) => TransportEvent::Message(value),
            Inbound::Diagnostic(line) => TransportEvent::Diagnostic(Diagnostic::from_line(line)),
        };
        if tx.send(event).is_err() {
            return false;
        }
    }
    true
}
