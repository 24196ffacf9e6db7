// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use glob::Pattern;
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::builtin::resolve_path;
use crate::tool::{Tool, ToolCall, ToolOutput};

const DEFAULT_LIMIT: usize = 50;

/// Extensions that are never worth scanning for text matches.
const BINARY_EXTENSIONS: &[&str] = &[
    "pyc", "pyo", "so", "dll", "exe", "bin", "png", "jpg", "jpeg", "gif", "ico", "pdf", "zip",
    "tar", "gz", "bz2", "7z", "rar", "mp3", "mp4", "avi", "mov", "wav", "ttf", "woff", "woff2",
    "eot", "db", "sqlite", "sqlite3",
];

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search for a pattern in file contents. \
         Supports regex patterns. \
         Can search in a specific file, directory, or filter by file glob. \
         Returns matching lines with file paths and line numbers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for in file contents."
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search in. Defaults to current directory."
                },
                "glob": {
                    "type": "string",
                    "description": "Glob pattern to filter files (e.g. '**/*.py'). Only used if path is a directory."
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Whether to ignore case. Default is false."
                },
                "context_lines": {
                    "type": "integer",
                    "description": "Number of lines to show before and after each match. Default is 0."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of matches to return. Default is 50."
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
        let search_path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => resolve_path(p),
            None => match std::env::current_dir() {
                Ok(d) => d,
                Err(e) => return ToolOutput::err(&call.id, format!("Error: {e}")),
            },
        };
        let glob_filter = call.args.get("glob").and_then(|v| v.as_str());
        let case_insensitive = call
            .args
            .get("case_insensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let context_lines = call
            .args
            .get("context_lines")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LIMIT as u64) as usize;

        debug!(pattern = %pattern, path = %search_path.display(), "grep tool");

        if !search_path.exists() {
            return ToolOutput::err(
                &call.id,
                format!("Error: Path does not exist: {}", search_path.display()),
            );
        }

        let regex = match RegexBuilder::new(&pattern)
            .case_insensitive(case_insensitive)
            .build()
        {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("Error: Invalid regex pattern: {e}")),
        };

        let glob_pattern = match glob_filter.map(Pattern::new) {
            Some(Ok(p)) => Some(p),
            Some(Err(e)) => {
                return ToolOutput::err(&call.id, format!("Error: Invalid glob pattern: {e}"))
            }
            None => None,
        };

        let files = collect_files(&search_path, glob_pattern.as_ref());

        let mut matches: Vec<String> = Vec::new();
        let mut match_count = 0usize;
        let mut files_with_matches = 0usize;

        for file_path in files {
            if match_count >= limit {
                break;
            }
            let file_matches =
                search_file(&file_path, &regex, context_lines, limit - match_count);
            if !file_matches.is_empty() {
                files_with_matches += 1;
                match_count += file_matches.len();
                matches.extend(file_matches);
            }
        }

        if matches.is_empty() {
            return ToolOutput::ok(&call.id, format!("No matches found for pattern: {pattern}"));
        }

        let header = format!("Found {match_count} match(es) in {files_with_matches} file(s):\n");
        let mut result = header + &matches.join("\n");
        if match_count >= limit {
            result.push_str(&format!("\n\n[Limited to {limit} matches]"));
        }

        ToolOutput::ok(&call.id, result)
    }
}

/// Files to scan: the path itself when it is a file, otherwise a recursive
/// walk filtered by the optional glob (matched against the path relative to
/// the search root) with binary files skipped.
fn collect_files(search_path: &Path, glob_pattern: Option<&Pattern>) -> Vec<PathBuf> {
    if search_path.is_file() {
        return vec![search_path.to_path_buf()];
    }
    WalkDir::new(search_path)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            if let Some(pat) = glob_pattern {
                let rel = e.path().strip_prefix(search_path).ok()?;
                if !pat.matches(&rel.to_string_lossy().replace('\\', "/")) {
                    return None;
                }
            }
            if is_binary(e.path()) {
                return None;
            }
            Some(e.into_path())
        })
        .collect()
}

/// Binary sniff: known extension, or a NUL byte in the first KiB.
fn is_binary(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            return true;
        }
    }
    match std::fs::File::open(path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut buf = [0u8; 1024];
            match f.read(&mut buf) {
                Ok(n) => buf[..n].contains(&0),
                Err(_) => true,
            }
        }
        Err(_) => true,
    }
}

fn search_file(
    file_path: &Path,
    regex: &Regex,
    context_lines: usize,
    remaining_limit: usize,
) -> Vec<String> {
    let content = match std::fs::read(file_path) {
        Ok(b) => String::from_utf8_lossy(&b).into_owned(),
        Err(_) => return Vec::new(),
    };
    let lines: Vec<&str> = content.lines().collect();

    let display_path = std::env::current_dir()
        .ok()
        .and_then(|cwd| file_path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| file_path.to_path_buf());
    let display = display_path.display();

    let mut matches = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if matches.len() >= remaining_limit {
            break;
        }
        if !regex.is_match(line) {
            continue;
        }
        let line_no = i + 1;
        if context_lines > 0 {
            let start = i.saturating_sub(context_lines);
            let end = (i + context_lines + 1).min(lines.len());
            let mut block = vec![format!("\n{display}:{line_no}:")];
            for j in start..end {
                let prefix = if j == i { ">" } else { " " };
                block.push(format!("  {prefix} {}: {}", j + 1, lines[j]));
            }
            matches.push(block.join("\n"));
        } else {
            matches.push(format!("{display}:{line_no}: {line}"));
        }
    }
    matches
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "s1".into(),
            name: "grep".into(),
            args,
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("main.rs"),
            "fn main() {\n    run();\n}\nfn run() {}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "run the tests\nnothing here\n").unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0u8, 1, 2, 3, 0, 255]).unwrap();
        dir
    }

    #[tokio::test]
    async fn finds_matches_with_header_and_locations() {
        let dir = fixture();
        let out = GrepTool
            .execute(&call(json!({"pattern": "fn \\w+", "path": dir.path()})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.starts_with("Found 2 match(es) in 1 file(s):"), "{}", out.content);
        assert!(out.content.contains("main.rs:1: fn main() {"));
        assert!(out.content.contains("main.rs:4: fn run() {}"));
    }

    #[tokio::test]
    async fn header_counts_match_body() {
        let dir = fixture();
        let out = GrepTool
            .execute(&call(json!({"pattern": "run", "path": dir.path()})))
            .await;
        // "run" appears in main.rs (2 lines) and notes.txt (1 line).
        assert!(out.content.starts_with("Found 3 match(es) in 2 file(s):"), "{}", out.content);
    }

    #[tokio::test]
    async fn invalid_regex_is_error() {
        let dir = fixture();
        let out = GrepTool
            .execute(&call(json!({"pattern": "(unclosed", "path": dir.path()})))
            .await;
        assert!(out.is_error);
        assert!(out.content.starts_with("Error: Invalid regex pattern"));
    }

    #[tokio::test]
    async fn no_matches_message() {
        let dir = fixture();
        let out = GrepTool
            .execute(&call(json!({"pattern": "xyzzy_absent", "path": dir.path()})))
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("No matches found for pattern: xyzzy_absent"));
    }

    #[tokio::test]
    async fn glob_filter_restricts_files() {
        let dir = fixture();
        let out = GrepTool
            .execute(&call(json!({
                "pattern": "run", "path": dir.path(), "glob": "*.txt"
            })))
            .await;
        assert!(out.content.contains("notes.txt"), "{}", out.content);
        assert!(!out.content.contains("main.rs"), "{}", out.content);
    }

    #[tokio::test]
    async fn case_insensitive_flag() {
        let dir = fixture();
        let out = GrepTool
            .execute(&call(json!({
                "pattern": "FN MAIN", "path": dir.path(), "case_insensitive": true
            })))
            .await;
        assert!(out.content.contains("main.rs:1"), "{}", out.content);
    }

    #[tokio::test]
    async fn binary_files_are_skipped_in_directory_walks() {
        let dir = fixture();
        // blob.bin contains byte 0x01; the walk must never surface it.
        let out = GrepTool
            .execute(&call(json!({"pattern": "\u{1}", "path": dir.path()})))
            .await;
        assert!(out.content.contains("No matches found"), "{}", out.content);
    }

    #[tokio::test]
    async fn limit_caps_matches_with_marker() {
        let dir = tempfile::TempDir::new().unwrap();
        let body: String = (0..20).map(|i| format!("match line {i}\n")).collect();
        std::fs::write(dir.path().join("many.txt"), body).unwrap();
        let out = GrepTool
            .execute(&call(json!({
                "pattern": "match", "path": dir.path(), "limit": 5
            })))
            .await;
        assert!(out.content.starts_with("Found 5 match(es) in 1 file(s):"), "{}", out.content);
        assert!(out.content.contains("[Limited to 5 matches]"));
    }

    #[tokio::test]
    async fn context_lines_render_a_block() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("ctx.txt"), "before\nneedle\nafter\n").unwrap();
        let out = GrepTool
            .execute(&call(json!({
                "pattern": "needle", "path": dir.path(), "context_lines": 1
            })))
            .await;
        assert!(out.content.contains("  > 2: needle"), "{}", out.content);
        assert!(out.content.contains("    1: before"), "{}", out.content);
        assert!(out.content.contains("    3: after"), "{}", out.content);
    }

    #[tokio::test]
    async fn missing_path_is_error() {
        let out = GrepTool
            .execute(&call(json!({"pattern": "x", "path": "/tmp/tern_no_grep_dir_xyz"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.starts_with("Error: Path does not exist"));
    }
}
