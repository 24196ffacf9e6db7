// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use glob::Pattern;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::builtin::resolve_path;
use crate::tool::{Tool, ToolCall, ToolOutput};

const DEFAULT_LIMIT: usize = 100;

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern. \
         Supports patterns like '**/*.py' (all Python files), \
         'src/**/*.ts' (TypeScript in src), '*.md' (markdown in current dir). \
         Returns file paths sorted by modification time (newest first)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern to match files (e.g. '**/*.py', 'src/**/*.ts')."
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in. Defaults to current working directory."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of files to return. Default is 100."
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let pattern = match call.args.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "Error: Missing required parameter: pattern"),
        };
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LIMIT as u64) as usize;

        let search_path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => resolve_path(p),
            None => match std::env::current_dir() {
                Ok(d) => d,
                Err(e) => return ToolOutput::err(&call.id, format!("Error: {e}")),
            },
        };

        debug!(pattern = %pattern, path = %search_path.display(), "glob tool");

        if !search_path.exists() {
            return ToolOutput::err(
                &call.id,
                format!("Error: Directory does not exist: {}", search_path.display()),
            );
        }
        if !search_path.is_dir() {
            return ToolOutput::err(
                &call.id,
                format!("Error: Not a directory: {}", search_path.display()),
            );
        }

        let compiled = match Pattern::new(&pattern) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, format!("Error: Invalid glob pattern: {e}")),
        };

        // Files only; directories never match. Pattern matches the path
        // relative to the search root, forward slashes on every platform.
        let mut files: Vec<(SystemTime, String)> = WalkDir::new(&search_path)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&search_path).ok()?;
                let rel_str = rel_for_glob(rel);
                if !compiled.matches(&rel_str) {
                    return None;
                }
                let mtime = e.metadata().ok()?.modified().ok()?;
                Some((mtime, rel_str))
            })
            .collect();

        files.sort_by(|a, b| b.0.cmp(&a.0));

        let truncated = files.len() > limit;
        files.truncate(limit);

        if files.is_empty() {
            return ToolOutput::ok(
                &call.id,
                format!("No files found matching pattern: {pattern}"),
            );
        }

        let mut lines = vec![format!("Found {} file(s) matching '{}':", files.len(), pattern)];
        for (_, rel) in &files {
            lines.push(format!("  {rel}"));
        }
        if truncated {
            lines.push(format!("\n[Limited to {limit} results]"));
        }

        ToolOutput::ok(&call.id, lines.join("\n"))
    }
}

fn rel_for_glob(p: &Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "g1".into(),
            name: "glob".into(),
            args,
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        std::fs::write(dir.path().join("b.txt"), "text").unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn l() {}").unwrap();
        dir
    }

    #[tokio::test]
    async fn matches_top_level_pattern() {
        let dir = fixture();
        let out = GlobTool
            .execute(&call(json!({"pattern": "*.rs", "path": dir.path()})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("a.rs"));
        assert!(!out.content.contains("lib.rs"), "{}", out.content);
    }

    #[tokio::test]
    async fn recursive_pattern_descends() {
        let dir = fixture();
        let out = GlobTool
            .execute(&call(json!({"pattern": "**/*.rs", "path": dir.path()})))
            .await;
        assert!(out.content.contains("src/lib.rs"), "{}", out.content);
    }

    #[tokio::test]
    async fn directories_never_match() {
        let dir = fixture();
        let out = GlobTool
            .execute(&call(json!({"pattern": "**/*", "path": dir.path()})))
            .await;
        assert!(!out.content.contains("  src\n"), "{}", out.content);
    }

    #[tokio::test]
    async fn no_matches_message() {
        let dir = fixture();
        let out = GlobTool
            .execute(&call(json!({"pattern": "*.zig", "path": dir.path()})))
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("No files found matching pattern: *.zig"));
    }

    #[tokio::test]
    async fn limit_truncates_with_marker() {
        let dir = tempfile::TempDir::new().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "x").unwrap();
        }
        let out = GlobTool
            .execute(&call(json!({"pattern": "*.txt", "path": dir.path(), "limit": 2})))
            .await;
        assert!(out.content.contains("Found 2 file(s)"), "{}", out.content);
        assert!(out.content.contains("[Limited to 2 results]"));
    }

    #[tokio::test]
    async fn newest_first_ordering() {
        let dir = tempfile::TempDir::new().unwrap();
        let old = dir.path().join("old.txt");
        let new = dir.path().join("new.txt");
        std::fs::write(&old, "x").unwrap();
        std::fs::write(&new, "x").unwrap();
        // Push the mtime of `old` into the past; creation order alone is not
        // reliable on filesystems with coarse timestamps.
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        let f = std::fs::File::open(&old).unwrap();
        f.set_modified(past).unwrap();

        let out = GlobTool
            .execute(&call(json!({"pattern": "*.txt", "path": dir.path()})))
            .await;
        let new_pos = out.content.find("new.txt").unwrap();
        let old_pos = out.content.find("old.txt").unwrap();
        assert!(new_pos < old_pos, "{}", out.content);
    }

    #[tokio::test]
    async fn missing_directory_is_error() {
        let out = GlobTool
            .execute(&call(json!({"pattern": "*", "path": "/tmp/tern_no_such_dir_xyz"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.starts_with("Error: Directory does not exist"));
    }

    #[tokio::test]
    async fn invalid_pattern_is_error() {
        let dir = fixture();
        let out = GlobTool
            .execute(&call(json!({"pattern": "[", "path": dir.path()})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("Invalid glob pattern"));
    }
}
