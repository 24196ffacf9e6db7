// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::builtin::{resolve_path, truncate_at_char_boundary};
use crate::tool::{Tool, ToolCall, ToolOutput};

const DEFAULT_LIMIT: usize = 2000;
const MAX_LINE_BYTES: usize = 2000;

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Returns the file contents with line numbers. \
         Use this to examine existing files before modifying them."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The absolute or relative path to the file to read."
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-indexed). Optional."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read. Optional, defaults to 2000."
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let file_path = match call.args.get("file_path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "Error: Missing required parameter: file_path"),
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LIMIT as u64) as usize;

        let path = resolve_path(file_path);
        debug!(path = %path.display(), "read tool");

        if !path.exists() {
            return ToolOutput::err(&call.id, format!("Error: File not found: {}", path.display()));
        }
        if !path.is_file() {
            return ToolOutput::err(&call.id, format!("Error: Not a file: {}", path.display()));
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) => return ToolOutput::err(&call.id, format!("Error reading file: {e}")),
        };
        let content = String::from_utf8_lossy(&bytes);

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        let start = offset.saturating_sub(1).min(total_lines);
        let end = start.saturating_add(limit).min(total_lines);

        let mut result_lines = Vec::with_capacity(end - start);
        for (i, line) in lines[start..end].iter().enumerate() {
            let line_no = start + i + 1;
            if line.len() > MAX_LINE_BYTES {
                let cut = truncate_at_char_boundary(line, MAX_LINE_BYTES);
                result_lines.push(format!("{line_no:6}\t{cut}...[truncated]"));
            } else {
                result_lines.push(format!("{line_no:6}\t{line}"));
            }
        }

        let mut result = result_lines.join("\n");
        if start > 0 || end < total_lines {
            result = format!(
                "[Showing lines {}-{} of {}]\n\n{}",
                start + 1,
                end,
                total_lines,
                result
            );
        }

        ToolOutput::ok(&call.id, result)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "r1".into(),
            name: "read".into(),
            args,
        }
    }

    fn tmp_file(content: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[tokio::test]
    async fn reads_whole_file_with_line_numbers() {
        let f = tmp_file("alpha\nbeta\n");
        let out = ReadTool
            .execute(&call(json!({"file_path": f.path()})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("1\talpha"));
        assert!(out.content.contains("2\tbeta"));
        assert!(!out.content.contains("[Showing lines"));
    }

    #[tokio::test]
    async fn offset_and_limit_select_a_slice_with_header() {
        let body: String = (1..=10).map(|i| format!("line{i}\n")).collect();
        let f = tmp_file(&body);
        let out = ReadTool
            .execute(&call(json!({"file_path": f.path(), "offset": 3, "limit": 2})))
            .await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("[Showing lines 3-4 of 10]"), "{}", out.content);
        assert!(out.content.contains("3\tline3"));
        assert!(out.content.contains("4\tline4"));
        assert!(!out.content.contains("line5"));
    }

    #[tokio::test]
    async fn missing_file_is_error_text() {
        let out = ReadTool
            .execute(&call(json!({"file_path": "/tmp/tern_no_such_file_xyz.txt"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.starts_with("Error: File not found"), "{}", out.content);
    }

    #[tokio::test]
    async fn directory_is_not_a_file_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = ReadTool
            .execute(&call(json!({"file_path": dir.path()})))
            .await;
        assert!(out.is_error);
        assert!(out.content.starts_with("Error: Not a file"), "{}", out.content);
    }

    #[tokio::test]
    async fn long_lines_are_truncated_with_marker() {
        let long = "x".repeat(5000);
        let f = tmp_file(&format!("{long}\nshort\n"));
        let out = ReadTool
            .execute(&call(json!({"file_path": f.path()})))
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("...[truncated]"));
        assert!(out.content.contains("2\tshort"));
    }

    #[tokio::test]
    async fn offset_past_end_yields_empty_slice_header() {
        let f = tmp_file("a\nb\n");
        let out = ReadTool
            .execute(&call(json!({"file_path": f.path(), "offset": 10})))
            .await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("[Showing lines 3-2 of 2]"), "{}", out.content);
    }

    #[tokio::test]
    async fn missing_file_path_parameter_is_error() {
        let out = ReadTool.execute(&call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.starts_with("Error:"));
    }
}
