// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default cap on captured file size (10 MiB). Larger files are treated as
/// absent for snapshot purposes.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// What happened to a file within one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// File didn't exist, now does
    Created,
    /// File existed, content changed
    Modified,
    /// File existed, now doesn't
    Deleted,
}

/// A single file modification within a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Absolute, canonicalized path
    pub path: String,
    pub kind: ChangeKind,
    /// None if the file was created this turn
    pub content_before: Option<String>,
    /// None if the file was deleted this turn
    pub content_after: Option<String>,
}

/// Frozen record of one turn's filesystem effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnCheckpoint {
    /// 1-indexed turn number
    pub turn_number: u32,
    /// Index into the conversation message log where this turn ended
    pub message_index: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub file_changes: Vec<FileChange>,
    /// Derived from the assistant's final text
    pub summary: Option<String>,
}

/// Session-level rewind tracking.
#[derive(Debug, Clone)]
pub struct RewindState {
    pub session_id: String,
    pub working_directory: String,
    /// Branch at session start (if a git repo)
    pub git_branch: Option<String>,
    /// Commit hash at session start
    pub git_head: Option<String>,
    pub current_turn: u32,
    pub checkpoints: Vec<TurnCheckpoint>,
    /// Original file states: the first content this session ever saw for each
    /// path (`None` = the path did not exist). Never overwritten once set.
    pub originals: HashMap<String, Option<String>>,
}

impl RewindState {
    pub fn new(
        session_id: impl Into<String>,
        working_directory: impl Into<String>,
        git_branch: Option<String>,
        git_head: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            working_directory: working_directory.into(),
            git_branch,
            git_head,
            current_turn: 0,
            checkpoints: Vec::new(),
            originals: HashMap::new(),
        }
    }
}

/// A file that changed outside the assistant since its last recorded state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: String,
    /// What the last checkpoint says the file should contain
    pub expected_content: Option<String>,
    /// What the file actually contains now
    pub actual_content: Option<String>,
}

/// Short stable hash of a file path, used for snapshot filenames.
pub fn hash_path(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

/// Read a file's content, returning `None` when it does not exist, exceeds
/// `max_size`, or is not valid UTF-8.
pub fn read_file_safe(path: &Path, max_size: u64) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    if !meta.is_file() || meta.len() > max_size {
        return None;
    }
    std::fs::read_to_string(path).ok()
}

/// Canonicalize a path that may not exist yet: resolve the longest existing
/// ancestor and re-append the remainder. Relative paths are anchored at the
/// current working directory.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) {
        if let Ok(parent_canonical) = parent.canonicalize() {
            return parent_canonical.join(name);
        }
    }
    absolute
}

/// Git context at session start.
#[derive(Debug, Clone, Default)]
pub struct GitContext {
    pub branch: Option<String>,
    pub head: Option<String>,
}

impl GitContext {
    /// Probe the working directory for git state. Both fields stay `None`
    /// outside a repository or when git is unavailable.
    pub fn detect(working_directory: &Path) -> Self {
        let branch = git_output(working_directory, &["rev-parse", "--abbrev-ref", "HEAD"]);
        let head = git_output(working_directory, &["rev-parse", "HEAD"]);
        Self { branch, head }
    }
}

fn git_output(cwd: &Path, args: &[&str]) -> Option<String> {
    let out = std::process::Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
