// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! MCP (Model Context Protocol) for tern — both directions of the bridge.
//!
//! The server side exposes tern's [`tern_tools::ToolRegistry`] to any
//! MCP-compatible host over line-delimited JSON-RPC:
//!
//! ```text
//! tern mcp serve
//! ```
//!
//! The client side imports a remote server's tools into the local registry
//! as [`adapter::RemoteTool`] entries, configured via the `mcp_servers`
//! table:
//!
//! ```text
//! MCP client (external host)                 tern
//!       │ stdio (line-delimited JSON-RPC)      │ ProcessTransport / HttpTransport
//!       ▼                                      ▼
//! McpServer ──► ToolRegistry            McpClient ──► RemoteTool adapters
//! ```

pub mod adapter;
pub mod client;
pub mod loader;
pub mod protocol;
pub mod server;
pub mod transport;

pub use adapter::RemoteTool;
pub use client::McpClient;
pub use loader::connect_configured_servers;
pub use protocol::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ToolInfo, PROTOCOL_VERSION,
};
pub use server::McpServer;
pub use transport::{HttpTransport, ProcessTransport, StdioTransport, Transport, TransportError};

use std::sync::Arc;

use tern_tools::ToolRegistry;

/// Serve the given registry on this process's stdin/stdout until the client
/// disconnects. This is the sole operation of the `tern mcp serve`
/// subcommand; nothing else may write to stdout while it runs.
pub async fn serve_stdio(registry: Arc<ToolRegistry>) -> anyhow::Result<()> {
    let transport = StdioTransport::new();
    let mut server = McpServer::new(registry);
    server.run(&transport).await
}
