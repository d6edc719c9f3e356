//! Model Context Protocol (MCP) client runtime for toolwire.
//!
//! Talks JSON-RPC 2.0 to a small set of long-lived, tool-providing worker
//! processes. Each worker is reached over one of two interchangeable
//! transports:
//!
//! ```text
//!                    ┌───────────────┐   newline JSON   ┌────────────────┐
//! ┌───────────────┐  │ LocalProcess  │─────────────────▶│ worker process │
//! │ ClientManager │─▶│               │                  └────────────────┘
//! │  └ McpClient  │  ├───────────────┤   8-byte frames  ┌────────────────┐
//! └───────────────┘  │ ContainerExec │─────────────────▶│ container exec │
//!                    └───────────────┘                  └────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use toolwire_mcp::{ClientManager, McpSettings};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = McpSettings::load().await?;
//! let manager = ClientManager::with_default_factory(settings);
//!
//! let output = manager
//!     .call_tool(
//!         "job-analysis",
//!         "validate_dependencies",
//!         serde_json::json!({"dependencies": {"react": "^18.0.0"}}),
//!     )
//!     .await?;
//! println!("{}", output.into_value());
//!
//! manager.stop_all().await;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod codec;
pub mod config;
pub mod diagnostics;
mod error;
mod manager;
mod output;
pub mod pending;
pub mod protocol;
pub mod transport;

pub use client::{ClientOptions, ClientState, McpClient, ServerNotification};
pub use codec::{Inbound, InboundDecoder, LineDecoder, MultiplexedDecoder};
pub use config::{McpSettings, ServerEndpoint, ServerOverride, TransportMode};
pub use diagnostics::{Diagnostic, Severity};
pub use error::{McpError, McpResult};
pub use manager::{ClientManager, DefaultTransportFactory, TransportFactory};
pub use output::ToolOutput;
pub use protocol::McpTool;
pub use transport::{
    ContainerExecConfig, ContainerExecTransport, LocalProcessConfig, LocalProcessTransport,
    Transport, TransportEvent, TransportKind,
};
