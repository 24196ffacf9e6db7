// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use tern_tools::{Tool, ToolCall, ToolOutput};

use crate::client::McpClient;
use crate::protocol::ToolInfo;

/// A remote MCP tool wrapped as a local registry [`Tool`].
///
/// The adapter holds its owning [`McpClient`] session: dropping the session
/// invalidates the adapter, so whoever registers adapters must keep the
/// client alive alongside the registry. Execution marshals the call onto the
/// client's transport and awaits the remote reply, so adapters must not be
/// driven from contexts that forbid awaiting.
pub struct RemoteTool {
    info: ToolInfo,
    client: Arc<McpClient>,
}

impl RemoteTool {
    pub fn new(info: ToolInfo, client: Arc<McpClient>) -> Self {
        Self { info, client }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.client.call_tool(&self.info.name, call.args.clone()).await {
            Ok((text, false)) => ToolOutput::ok(&call.id, text),
            Ok((text, true)) => ToolOutput::err(&call.id, text),
            Err(e) => ToolOutput::err(
                &call.id,
                format!("Error executing {}: {e}", self.info.name),
            ),
        }
    }
}
