// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::builtin::truncate_at_char_boundary;
use crate::tool::{Tool, ToolCall, ToolOutput};

const MAX_OUTPUT_CHARS: usize = 50_000;

pub struct BashTool {
    pub timeout_secs: u64,
}

impl Default for BashTool {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command and return its output. \
         Use this for running tests, git commands, package managers, etc. \
         Commands run in the current working directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute."
                },
                "timeout": {
                    "type": "integer",
                    "description": format!("Timeout in seconds. Default is {}.", self.timeout_secs)
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "Error: Missing required parameter: command"),
        };
        let timeout = call
            .args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);

        debug!(cmd = %command, timeout, "bash tool");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(timeout),
            cmd.output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                let mut parts = String::new();
                if !stdout.is_empty() {
                    parts.push_str(&stdout);
                }
                if !stderr.is_empty() {
                    if !parts.is_empty() {
                        parts.push_str("\n--- stderr ---\n");
                    }
                    parts.push_str(&stderr);
                }
                let code = output.status.code().unwrap_or(-1);
                if code != 0 {
                    parts.push_str(&format!("\n[Exit code: {code}]"));
                }

                let out = if parts.len() > MAX_OUTPUT_CHARS {
                    format!(
                        "{}\n\n[Output truncated at {MAX_OUTPUT_CHARS} characters]",
                        truncate_at_char_boundary(&parts, MAX_OUTPUT_CHARS)
                    )
                } else {
                    parts
                };

                if out.is_empty() {
                    ToolOutput::ok(&call.id, "[Command completed with no output]")
                } else {
                    ToolOutput::ok(&call.id, out)
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("Error executing command: {e}")),
            Err(_) => ToolOutput::err(
                &call.id,
                format!("Error: Command timed out after {timeout} seconds"),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
