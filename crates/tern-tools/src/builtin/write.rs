// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::builtin::resolve_path;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, \
         or overwrites if it does. Creates parent directories as needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The absolute or relative path to the file to write."
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file."
                }
            },
            "required": ["file_path", "content"]
        })
    }

    fn mutated_paths(&self, args: &Value) -> Vec<PathBuf> {
        args.get("file_path")
            .and_then(|v| v.as_str())
            .map(|p| vec![resolve_path(p)])
            .unwrap_or_default()
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let file_path = match call.args.get("file_path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "Error: Missing required parameter: file_path"),
        };
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "Error: Missing required parameter: content"),
        };

        let path = resolve_path(file_path);
        debug!(path = %path.display(), bytes = content.len(), "write tool");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolOutput::err(&call.id, format!("Error creating directory: {e}"));
                }
            }
        }

        let existed = path.exists();

        // Write-then-rename so a crash mid-write never leaves a truncated
        // file: the path holds either the old content or the new content.
        match atomic_write(&path, &content) {
            Ok(()) => {}
            Err(e) => return ToolOutput::err(&call.id, format!("Error writing file: {e}")),
        }

        let line_count = content.matches('\n').count()
            + if !content.is_empty() && !content.ends_with('\n') {
                1
            } else {
                0
            };

        let action = if existed { "Updated" } else { "Created" };
        ToolOutput::ok(
            &call.id,
            format!("{action} {} ({line_count} lines)", path.display()),
        )
    }
}

fn atomic_write(path: &std::path::Path, content: &str) -> std::io::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(d) => tempfile::NamedTempFile::new_in(d)?,
        None => tempfile::NamedTempFile::new()?,
    };
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
