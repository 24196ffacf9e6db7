// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use tern_tools::{ToolCall, ToolRegistry};

use crate::protocol::{
    CallToolParams, ToolCallResult, ToolInfo, INTERNAL_ERROR, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use crate::transport::Transport;

/// MCP server: exposes a [`ToolRegistry`] to an external client over any
/// [`Transport`].
///
/// `initialize` gates everything else; notifications (messages without an
/// `id`) are accepted and ignored. Tool failures — unknown names included —
/// travel inside `tools/call` results with `isError: true` rather than as
/// JSON-RPC error envelopes, mirroring the in-process convention.
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    name: String,
    version: String,
    initialized: bool,
}

impl McpServer {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            name: "tern".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            initialized: false,
        }
    }

    /// Serve requests until the client disconnects.
    pub async fn run(&mut self, transport: &dyn Transport) -> anyhow::Result<()> {
        while let Some(message) = transport.recv().await? {
            // Notifications carry no id and get no reply.
            if message.get("id").is_none() {
                debug!(method = ?message.get("method"), "notification received");
                continue;
            }
            let response = self.handle_request(&message).await;
            transport.send(&response).await?;
        }
        transport.close().await;
        Ok(())
    }

    /// Dispatch one request and build its response envelope.
    pub async fn handle_request(&mut self, request: &Value) -> Value {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string();
        let params = request.get("params").cloned().unwrap_or(json!({}));

        let result = match method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "tools/list" => self.handle_list_tools(),
            "tools/call" => self.handle_call_tool(params).await,
            other => {
                return error_envelope(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                )
            }
        };

        match result {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(e) => {
                warn!(method, error = %e, "request handler failed");
                error_envelope(id, INTERNAL_ERROR, format!("Internal error: {e}"))
            }
        }
    }

    fn handle_initialize(&mut self) -> Value {
        self.initialized = true;
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": self.name, "version": self.version },
        })
    }

    fn handle_list_tools(&self) -> anyhow::Result<Value> {
        if !self.initialized {
            anyhow::bail!("server not initialized");
        }
        let tools: Vec<ToolInfo> = self
            .registry
            .schemas()
            .into_iter()
            .map(|s| ToolInfo {
                name: s.name,
                description: s.description,
                input_schema: s.parameters,
            })
            .collect();
        Ok(json!({ "tools": tools }))
    }

    async fn handle_call_tool(&self, params: Value) -> anyhow::Result<Value> {
        if !self.initialized {
            anyhow::bail!("server not initialized");
        }
        let params: CallToolParams = serde_json::from_value(params)?;
        let args = params
            .arguments
            .unwrap_or_else(|| Value::Object(Default::default()));

        let call = ToolCall {
            id: format!("mcp-{}", params.name),
            name: params.name,
            args,
        };
        let output = self.registry.execute(&call).await;
        Ok(serde_json::to_value(ToolCallResult::text(
            output.content,
            output.is_error,
        ))?)
    }
}

fn error_envelope(id: Value, code: i64, message: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
