// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! On-disk layout, per session:
//!
//! ```text
//! {sessions_root}/{session_id}/
//! ├── rewind.json                       # session metadata, no file contents
//! └── snapshots/
//!     ├── originals/
//!     │   ├── {path_hash}.snapshot      # content the first time we saw it
//!     │   └── {path_hash}.meta          # {"path": "/abs/path", "existed": bool}
//!     └── turns/
//!         └── turn-{NNN}/
//!             ├── {path_hash}.snapshot  # content_after (absent for deletions)
//!             └── manifest.json         # change descriptors for this turn
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::{hash_path, ChangeKind, FileChange, RewindState, TurnCheckpoint};

#[derive(Debug, Serialize, Deserialize)]
struct OriginalMeta {
    path: String,
    existed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct TurnManifest {
    turn_number: u32,
    message_index: usize,
    timestamp: DateTime<Utc>,
    summary: Option<String>,
    changes: Vec<ManifestChange>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestChange {
    path: String,
    path_hash: String,
    #[serde(rename = "change_type")]
    kind: ChangeKind,
}

#[derive(Debug, Serialize, Deserialize)]
struct RewindStateFile {
    session_id: String,
    working_directory: String,
    git_branch: Option<String>,
    git_head: Option<String>,
    current_turn: u32,
    /// Existence map only — contents live in the snapshot files.
    originals: HashMap<String, bool>,
    checkpoint_turns: Vec<u32>,
}

/// Durable, content-keyed storage of file snapshots for one session.
///
/// The store assumes it is the sole writer of its session directory;
/// concurrent sessions must use distinct session ids.
pub struct SnapshotStore {
    pub session_id: String,
    session_dir: PathBuf,
    snapshots_dir: PathBuf,
    originals_dir: PathBuf,
    turns_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(sessions_root: &Path, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let session_dir = sessions_root.join(&session_id);
        let snapshots_dir = session_dir.join("snapshots");
        Self {
            originals_dir: snapshots_dir.join("originals"),
            turns_dir: snapshots_dir.join("turns"),
            snapshots_dir,
            session_dir,
            session_id,
        }
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    fn ensure_dirs(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.originals_dir)
            .with_context(|| format!("creating {}", self.originals_dir.display()))?;
        std::fs::create_dir_all(&self.turns_dir)
            .with_context(|| format!("creating {}", self.turns_dir.display()))?;
        Ok(())
    }

    fn turn_dir(&self, turn_number: u32) -> PathBuf {
        self.turns_dir.join(format!("turn-{turn_number:03}"))
    }

    /// Save the original state of a path. No-op when this session already
    /// captured an original for it — the first capture wins.
    pub fn save_original(&self, path: &str, content: Option<&str>) -> anyhow::Result<()> {
        self.ensure_dirs()?;
        let path_hash = hash_path(path);
        let meta_file = self.originals_dir.join(format!("{path_hash}.meta"));
        if meta_file.exists() {
            return Ok(());
        }

        let meta = OriginalMeta {
            path: path.to_string(),
            existed: content.is_some(),
        };
        std::fs::write(&meta_file, serde_json::to_string(&meta)?)
            .with_context(|| format!("writing {}", meta_file.display()))?;

        if let Some(content) = content {
            let snapshot_file = self.originals_dir.join(format!("{path_hash}.snapshot"));
            std::fs::write(&snapshot_file, content)
                .with_context(|| format!("writing {}", snapshot_file.display()))?;
        }
        Ok(())
    }

    /// Load the original state of a path: `(existed, content)`.
    /// `(false, None)` when no original was ever captured.
    pub fn load_original(&self, path: &str) -> (bool, Option<String>) {
        let path_hash = hash_path(path);
        let meta_file = self.originals_dir.join(format!("{path_hash}.meta"));
        let meta: OriginalMeta = match std::fs::read_to_string(&meta_file)
            .ok()
            .and_then(|t| serde_json::from_str(&t).ok())
        {
            Some(m) => m,
            None => return (false, None),
        };
        if !meta.existed {
            return (false, None);
        }
        let snapshot_file = self.originals_dir.join(format!("{path_hash}.snapshot"));
        (true, std::fs::read_to_string(snapshot_file).ok())
    }

    /// Persist a turn checkpoint: one snapshot per non-deleted change plus a
    /// manifest enumerating every change.
    pub fn save_turn(&self, checkpoint: &TurnCheckpoint) -> anyhow::Result<()> {
        self.ensure_dirs()?;
        let turn_dir = self.turn_dir(checkpoint.turn_number);
        std::fs::create_dir_all(&turn_dir)
            .with_context(|| format!("creating {}", turn_dir.display()))?;

        let mut changes = Vec::with_capacity(checkpoint.file_changes.len());
        for change in &checkpoint.file_changes {
            let path_hash = hash_path(&change.path);
            changes.push(ManifestChange {
                path: change.path.clone(),
                path_hash: path_hash.clone(),
                kind: change.kind,
            });
            if let Some(content) = &change.content_after {
                let snapshot_file = turn_dir.join(format!("{path_hash}.snapshot"));
                std::fs::write(&snapshot_file, content)
                    .with_context(|| format!("writing {}", snapshot_file.display()))?;
            }
        }

        let manifest = TurnManifest {
            turn_number: checkpoint.turn_number,
            message_index: checkpoint.message_index,
            timestamp: checkpoint.timestamp,
            summary: checkpoint.summary.clone(),
            changes,
        };
        let manifest_file = turn_dir.join("manifest.json");
        std::fs::write(&manifest_file, serde_json::to_string_pretty(&manifest)?)
            .with_context(|| format!("writing {}", manifest_file.display()))?;
        Ok(())
    }

    /// Reconstruct a turn checkpoint. `content_before` is filled from the
    /// originals store — rewind semantics only need the original and the
    /// terminal per-turn state, never intermediate in-turn predecessors.
    pub fn load_turn(&self, turn_number: u32) -> Option<TurnCheckpoint> {
        let turn_dir = self.turn_dir(turn_number);
        let manifest: TurnManifest = std::fs::read_to_string(turn_dir.join("manifest.json"))
            .ok()
            .and_then(|t| serde_json::from_str(&t).ok())?;

        let mut file_changes = Vec::with_capacity(manifest.changes.len());
        for entry in manifest.changes {
            let snapshot_file = turn_dir.join(format!("{}.snapshot", entry.path_hash));
            let content_after = std::fs::read_to_string(snapshot_file).ok();
            let (existed, content_before) = self.load_original(&entry.path);
            file_changes.push(FileChange {
                path: entry.path,
                kind: entry.kind,
                content_before: if existed { content_before } else { None },
                content_after,
            });
        }

        Some(TurnCheckpoint {
            turn_number: manifest.turn_number,
            message_index: manifest.message_index,
            timestamp: manifest.timestamp,
            file_changes,
            summary: manifest.summary,
        })
    }

    /// Persist session state. File contents stay in the snapshot tree; the
    /// state file records only the originals existence map and the ordered
    /// list of recorded turns.
    pub fn save_rewind_state(&self, state: &RewindState) -> anyhow::Result<()> {
        self.ensure_dirs()?;
        let file = RewindStateFile {
            session_id: state.session_id.clone(),
            working_directory: state.working_directory.clone(),
            git_branch: state.git_branch.clone(),
            git_head: state.git_head.clone(),
            current_turn: state.current_turn,
            originals: state
                .originals
                .iter()
                .map(|(p, c)| (p.clone(), c.is_some()))
                .collect(),
            checkpoint_turns: state.checkpoints.iter().map(|c| c.turn_number).collect(),
        };
        let path = self.session_dir.join("rewind.json");
        std::fs::write(&path, serde_json::to_string_pretty(&file)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Load session state, rebuilding checkpoints from the turn directories
    /// and original contents from the originals store.
    pub fn load_rewind_state(&self) -> Option<RewindState> {
        let path = self.session_dir.join("rewind.json");
        let file: RewindStateFile = std::fs::read_to_string(&path)
            .ok()
            .and_then(|t| serde_json::from_str(&t).ok())?;

        let mut checkpoints = Vec::new();
        for turn in &file.checkpoint_turns {
            match self.load_turn(*turn) {
                Some(cp) => checkpoints.push(cp),
                None => warn!(turn, "recorded turn is missing from the snapshot store"),
            }
        }

        let originals = file
            .originals
            .keys()
            .map(|p| {
                let (existed, content) = self.load_original(p);
                (p.clone(), if existed { content } else { None })
            })
            .collect();

        Some(RewindState {
            session_id: file.session_id,
            working_directory: file.working_directory,
            git_branch: file.git_branch,
            git_head: file.git_head,
            current_turn: file.current_turn,
            checkpoints,
            originals,
        })
    }

    /// Remove a pruned turn's directory. Missing directories are fine.
    pub fn remove_turn(&self, turn_number: u32) {
        let dir = self.turn_dir(turn_number);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(turn = turn_number, error = %e, "failed to remove turn snapshot dir");
            }
        }
    }

    /// Remove all snapshots for this session, keeping `rewind.json`.
    pub fn cleanup(&self) {
        if self.snapshots_dir.exists() {
            let _ = std::fs::remove_dir_all(&self.snapshots_dir);
        }
    }

    /// Remove the entire session directory.
    pub fn cleanup_full(&self) {
        if self.session_dir.exists() {
            let _ = std::fs::remove_dir_all(&self.session_dir);
        }
    }

    /// Total size of stored snapshots, bytes.
    pub fn storage_size(&self) -> u64 {
        fn dir_size(path: &Path) -> u64 {
            let Ok(entries) = std::fs::read_dir(path) else {
                return 0;
            };
            entries
                .filter_map(|e| e.ok())
                .map(|e| {
                    let p = e.path();
                    if p.is_dir() {
                        dir_size(&p)
                    } else {
                        e.metadata().map(|m| m.len()).unwrap_or(0)
                    }
                })
                .sum()
        }
        if self.snapshots_dir.exists() {
            dir_size(&self.snapshots_dir)
        } else {
            0
        }
    }

    /// All original file paths captured for this session.
    pub fn list_originals(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.originals_dir) else {
            return Vec::new();
        };
        let mut paths: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "meta").unwrap_or(false))
            .filter_map(|e| {
                let text = std::fs::read_to_string(e.path()).ok()?;
                let meta: OriginalMeta = serde_json::from_str(&text).ok()?;
                Some(meta.path)
            })
            .collect();
        paths.sort();
        paths
    }

    /// All recorded turn numbers, ascending.
    pub fn list_turns(&self) -> Vec<u32> {
        let Ok(entries) = std::fs::read_dir(&self.turns_dir) else {
            return Vec::new();
        };
        let mut turns: Vec<u32> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                e.file_name()
                    .to_str()?
                    .strip_prefix("turn-")?
                    .parse::<u32>()
                    .ok()
            })
            .collect();
        turns.sort_unstable();
        turns
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
