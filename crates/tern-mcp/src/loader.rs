// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tracing::{info, warn};

use tern_config::{Config, McpServerConfig};
use tern_tools::ToolRegistry;

use crate::adapter::RemoteTool;
use crate::client::McpClient;
use crate::transport::{HttpTransport, ProcessTransport, Transport};

/// Connect every configured MCP server and register its tools as adapters.
///
/// Returns the live client sessions; the caller must keep them for as long
/// as the registry holds the adapters. A server that fails to start or
/// initialize is logged and skipped — external servers are optional
/// conveniences, not startup requirements.
pub async fn connect_configured_servers(
    config: &Config,
    registry: &mut ToolRegistry,
) -> Vec<Arc<McpClient>> {
    let mut sessions = Vec::new();

    for (name, server) in &config.mcp_servers {
        match connect_one(server).await {
            Ok((client, tools)) => {
                info!(server = %name, tools = tools.len(), "connected MCP server");
                for info in tools {
                    registry.register_arc(Arc::new(RemoteTool::new(info, Arc::clone(&client))));
                }
                sessions.push(client);
            }
            Err(e) => {
                warn!(server = %name, error = %e, "skipping MCP server");
            }
        }
    }

    sessions
}

async fn connect_one(
    server: &McpServerConfig,
) -> anyhow::Result<(Arc<McpClient>, Vec<crate::protocol::ToolInfo>)> {
    let transport: Arc<dyn Transport> = match server.kind.as_str() {
        "command" => {
            let command = server
                .command
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("missing command"))?;
            Arc::new(ProcessTransport::spawn(
                command,
                &server.args,
                &server.env,
                server.cwd.as_deref(),
            )?)
        }
        "http" => {
            let url = server
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("missing url"))?;
            Arc::new(HttpTransport::new(url, server.headers.clone()))
        }
        other => anyhow::bail!("unknown server type {other:?}"),
    };

    let client = Arc::new(McpClient::new(transport));
    client.initialize().await?;
    let tools = client.list_tools().await?;
    Ok((client, tools))
}
