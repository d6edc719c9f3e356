//! Testing utilities, fixtures, and mocks for toolwire.
//!
//! This crate provides common testing infrastructure used across the toolwire workspace:
//!
//! - **Fixtures**: Temporary project layouts, canned MCP payloads, a shell stub worker
//! - **Mocks**: A scriptable transport and a transport factory that records what it built
//! - **Container**: An in-memory container runtime with fake exec sessions
//! - **Assertions**: Helpers for checking JSON-RPC traffic
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolwire_mcp::{ClientOptions, McpClient};
//! use toolwire_test_utils::{fixtures::text_result, MockTransport};
//!
//! #[tokio::test]
//! async fn test_ping() {
//!     let transport = MockTransport::new()
//!         .with_handshake()
//!         .with_tool("ping", "Liveness check")
//!         .with_tool_result("ping", text_result("pong"));
//!
//!     let client = McpClient::new("monitoring", Arc::new(transport), ClientOptions::default());
//!     client.start().await.unwrap();
//!     assert!(client.has_tool("ping").await);
//! }
//! ```

pub mod assertions;
pub mod container;
pub mod fixtures;
pub mod mocks;

// Re-export commonly used items
pub use container::{FakeContainerRuntime, FakeExec};
pub use fixtures::TestProject;
pub use mocks::{MockTransport, MockTransportFactory, ToolReply};
