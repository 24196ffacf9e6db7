// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
///
/// Tool failures are conversation-level data, never process failures: they
/// travel back to the model as text whose first token is `Error:`, with
/// `is_error` set for consumers that want to render them differently.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    /// If true, the tool execution failed non-fatally (returned error message).
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Trait that every built-in and remote-adapter tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Filesystem paths this invocation may mutate, resolved from the
    /// argument object. The turn driver snapshots each declared path before
    /// dispatch. Tools whose targets cannot be known up front (`bash`)
    /// declare nothing.
    fn mutated_paths(&self, _args: &Value) -> Vec<PathBuf> {
        Vec::new()
    }
    /// Execute the tool. Failures are wrapped in [`ToolOutput::err`], never
    /// raised across this boundary.
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[test]
    fn output_ok_is_not_error() {
        let out = ToolOutput::ok("1", "fine");
        assert!(!out.is_error);
        assert_eq!(out.content, "fine");
    }

    #[test]
    fn output_err_sets_flag() {
        let out = ToolOutput::err("1", "Error: broke");
        assert!(out.is_error);
    }

    #[test]
    fn default_mutated_paths_is_empty() {
        assert!(MinimalTool.mutated_paths(&json!({"x": 1})).is_empty());
    }
}
