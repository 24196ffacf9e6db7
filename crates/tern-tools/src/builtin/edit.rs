// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::builtin::resolve_path;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing a specific string with a new string. \
         The old_string must match exactly (including whitespace and indentation). \
         Use the read tool first to see the exact content to replace."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The absolute or relative path to the file to edit."
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact string to find and replace. Must match exactly."
                },
                "new_string": {
                    "type": "string",
                    "description": "The string to replace old_string with."
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "If true, replace all occurrences. Default is false (replace first only)."
                }
            },
            "required": ["file_path", "old_string", "new_string"]
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
        let old_string = match call.args.get("old_string").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "Error: Missing required parameter: old_string"),
        };
        let new_string = match call.args.get("new_string").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "Error: Missing required parameter: new_string"),
        };
        let replace_all = call
            .args
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let path = resolve_path(file_path);
        debug!(path = %path.display(), replace_all, "edit tool");

        if !path.exists() {
            return ToolOutput::err(&call.id, format!("Error: File not found: {}", path.display()));
        }
        if !path.is_file() {
            return ToolOutput::err(&call.id, format!("Error: Not a file: {}", path.display()));
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("Error reading file: {e}")),
        };

        if !content.contains(&old_string) {
            let hint = partial_match_hint(&content, &old_string);
            return ToolOutput::err(
                &call.id,
                format!("Error: old_string not found in file.{hint}"),
            );
        }

        let count = content.matches(&old_string).count();
        if count > 1 && !replace_all {
            return ToolOutput::err(
                &call.id,
                format!(
                    "Error: Found {count} occurrences of old_string. \
                     Either make old_string more specific, or set replace_all=true."
                ),
            );
        }

        let (new_content, replaced_count) = if replace_all {
            (content.replace(&old_string, &new_string), count)
        } else {
            (content.replacen(&old_string, &new_string, 1), 1)
        };

        if let Err(e) = tokio::fs::write(&path, &new_content).await {
            return ToolOutput::err(&call.id, format!("Error writing file: {e}"));
        }

        ToolOutput::ok(
            &call.id,
            format!("Replaced {replaced_count} occurrence(s) in {}", path.display()),
        )
    }
}

/// Line numbers (1-based, first five) whose content contains the first line
/// of `old_string` — a breadcrumb for near-miss matches.
fn partial_match_hint(content: &str, old_string: &str) -> String {
    let first_line = old_string.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return String::new();
    }
    let lines: Vec<usize> = content
        .lines()
        .enumerate()
        .filter(|(_, l)| l.contains(first_line))
        .map(|(i, _)| i + 1)
        .take(5)
        .collect();
    if lines.is_empty() {
        String::new()
    } else {
        let joined = lines
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!(" Partial matches found on lines: {joined}")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "e1".into(),
            name: "edit".into(),
            args,
        }
    }

    fn tmp_file(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("f.txt");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn replaces_single_occurrence() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = tmp_file(&dir, "hello world\n");
        let out = EditTool
            .execute(&call(json!({
                "file_path": path, "old_string": "world", "new_string": "rust"
            })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("Replaced 1 occurrence(s)"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello rust\n");
    }

    #[tokio::test]
    async fn multiple_occurrences_without_replace_all_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = tmp_file(&dir, "x x x");
        let out = EditTool
            .execute(&call(json!({
                "file_path": path, "old_string": "x", "new_string": "y"
            })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("Found 3 occurrences"), "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x x x", "file must be unchanged");
    }

    #[tokio::test]
    async fn replace_all_replaces_every_occurrence() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = tmp_file(&dir, "x x x");
        let out = EditTool
            .execute(&call(json!({
                "file_path": path, "old_string": "x", "new_string": "y", "replace_all": true
            })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("Replaced 3 occurrence(s)"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "y y y");
    }

    #[tokio::test]
    async fn not_found_reports_partial_match_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = tmp_file(&dir, "fn alpha() {\n    body();\n}\n");
        let out = EditTool
            .execute(&call(json!({
                "file_path": path,
                "old_string": "fn alpha() {\n    other();\n}",
                "new_string": "x"
            })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("old_string not found"));
        assert!(out.content.contains("Partial matches found on lines: 1"), "{}", out.content);
    }

    #[tokio::test]
    async fn not_found_without_partial_matches_has_no_hint() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = tmp_file(&dir, "abc\n");
        let out = EditTool
            .execute(&call(json!({
                "file_path": path, "old_string": "zzz", "new_string": "y"
            })))
            .await;
        assert!(out.is_error);
        assert!(!out.content.contains("Partial matches"), "{}", out.content);
    }

    #[tokio::test]
    async fn identical_replacement_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = tmp_file(&dir, "stable content\n");
        for _ in 0..2 {
            let out = EditTool
                .execute(&call(json!({
                    "file_path": path, "old_string": "stable", "new_string": "stable"
                })))
                .await;
            assert!(!out.is_error, "{}", out.content);
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "stable content\n");
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let out = EditTool
            .execute(&call(json!({
                "file_path": "/tmp/tern_no_such_edit_target.txt",
                "old_string": "a",
                "new_string": "b"
            })))
            .await;
        assert!(out.is_error);
        assert!(out.content.starts_with("Error: File not found"));
    }

    #[test]
    fn declares_target_path_for_snapshot() {
        let paths = EditTool.mutated_paths(&json!({"file_path": "/tmp/t.txt"}));
        assert_eq!(paths, vec![PathBuf::from("/tmp/t.txt")]);
    }
}
