// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use tracing::{debug, warn};

use crate::state::{
    normalize_path, read_file_safe, ChangeKind, Conflict, FileChange, GitContext, RewindState,
    TurnCheckpoint, DEFAULT_MAX_FILE_SIZE,
};
use crate::store::SnapshotStore;

/// Owns the rewind state and the snapshot store for one session.
///
/// Turn lifecycle: `begin_turn` → any number of `capture_before` /
/// `capture_after` pairs → `end_turn`. `end_turn` is the single publication
/// point: a crash between a capture and `end_turn` leaves no checkpoint
/// visible.
pub struct RewindManager {
    pub state: RewindState,
    store: SnapshotStore,
    current_turn_changes: Vec<FileChange>,
    turn_in_progress: bool,
    max_file_size: u64,
}

impl RewindManager {
    /// Initialize a new manager for a session. The working directory defaults
    /// to the process cwd and git context is auto-detected when not supplied.
    pub fn initialize(
        sessions_root: &Path,
        session_id: impl Into<String>,
        working_directory: Option<&Path>,
        git_context: Option<GitContext>,
    ) -> Self {
        let session_id = session_id.into();
        let cwd = working_directory
            .map(Path::to_path_buf)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();
        let git = git_context.unwrap_or_else(|| GitContext::detect(&cwd));

        let state = RewindState::new(
            session_id.clone(),
            cwd.to_string_lossy().into_owned(),
            git.branch,
            git.head,
        );
        let store = SnapshotStore::new(sessions_root, session_id);

        Self {
            state,
            store,
            current_turn_changes: Vec::new(),
            turn_in_progress: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Load an existing session from disk, or `None` when it has no recorded
    /// rewind state.
    pub fn load(sessions_root: &Path, session_id: &str) -> Option<Self> {
        let store = SnapshotStore::new(sessions_root, session_id);
        let state = store.load_rewind_state()?;
        Some(Self {
            state,
            store,
            current_turn_changes: Vec::new(),
            turn_in_progress: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        })
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn current_turn(&self) -> u32 {
        self.state.current_turn
    }

    /// Mark the beginning of a new conversation turn. Clears the per-turn
    /// change set.
    pub fn begin_turn(&mut self) {
        self.turn_in_progress = true;
        self.current_turn_changes.clear();
    }

    /// Capture a file's state before a mutation. Reads the file once per
    /// path per turn; the first capture session-wide also records the
    /// originals entry (which is never overwritten afterwards).
    pub fn capture_before(&mut self, path: &Path) {
        if !self.turn_in_progress {
            return;
        }
        let path = normalize_path(path).to_string_lossy().into_owned();
        if self.current_turn_changes.iter().any(|c| c.path == path) {
            return;
        }

        let content = read_file_safe(Path::new(&path), self.max_file_size);

        if !self.state.originals.contains_key(&path) {
            self.state.originals.insert(path.clone(), content.clone());
            if let Err(e) = self.store.save_original(&path, content.as_deref()) {
                warn!(path = %path, error = %e, "failed to persist original snapshot");
            }
        }

        let kind = if content.is_none() {
            ChangeKind::Created
        } else {
            ChangeKind::Modified
        };
        self.current_turn_changes.push(FileChange {
            path,
            kind,
            content_before: content,
            content_after: None,
        });
    }

    /// Record the outcome of a mutation. When `capture_before` was skipped
    /// the change is reconstructed from the recorded original. The change
    /// kind is inferred from the before/after pair unless given explicitly.
    pub fn capture_after(&mut self, path: &Path, content: Option<String>, kind: Option<ChangeKind>) {
        if !self.turn_in_progress {
            return;
        }
        let path = normalize_path(path).to_string_lossy().into_owned();

        if !self.current_turn_changes.iter().any(|c| c.path == path) {
            let content_before = self.state.originals.get(&path).cloned().flatten();
            self.current_turn_changes.push(FileChange {
                path: path.clone(),
                kind: ChangeKind::Modified,
                content_before,
                content_after: None,
            });
        }
        let change = self
            .current_turn_changes
            .iter_mut()
            .find(|c| c.path == path)
            .expect("change entry was just ensured");

        change.content_after = content;
        change.kind = match kind {
            Some(k) => k,
            None => {
                if change.content_after.is_none() {
                    ChangeKind::Deleted
                } else if change.content_before.is_none() {
                    ChangeKind::Created
                } else {
                    ChangeKind::Modified
                }
            }
        };
    }

    /// Close the turn: increment the counter, freeze the change set into a
    /// checkpoint, and persist it.
    pub fn end_turn(&mut self, message_index: usize, summary: Option<String>) -> TurnCheckpoint {
        self.state.current_turn += 1;

        let checkpoint = TurnCheckpoint {
            turn_number: self.state.current_turn,
            message_index,
            timestamp: Utc::now(),
            file_changes: std::mem::take(&mut self.current_turn_changes),
            summary,
        };
        self.state.checkpoints.push(checkpoint.clone());

        if let Err(e) = self.store.save_turn(&checkpoint) {
            warn!(turn = checkpoint.turn_number, error = %e, "failed to persist turn snapshot");
        }
        self.persist();

        self.turn_in_progress = false;
        checkpoint
    }

    pub fn get_turn_summary(&self, turn_number: u32) -> Option<&str> {
        self.state
            .checkpoints
            .iter()
            .find(|c| c.turn_number == turn_number)
            .and_then(|c| c.summary.as_deref())
    }

    /// All file changes recorded after the given turn, in checkpoint order.
    pub fn get_files_modified_after_turn(&self, turn_number: u32) -> Vec<&FileChange> {
        self.state
            .checkpoints
            .iter()
            .filter(|c| c.turn_number > turn_number)
            .flat_map(|c| c.file_changes.iter())
            .collect()
    }

    /// Detect files modified outside the assistant since their last recorded
    /// state. For each path in the undo set the current content is compared
    /// to the `content_after` of the most recent checkpoint that touched it;
    /// any mismatch is a conflict (at most one per path).
    pub fn validate_before_rewind(&self, target_turn: u32) -> Vec<Conflict> {
        // Undo set: paths touched after the target turn, first-occurrence order.
        let mut undo_set: Vec<&str> = Vec::new();
        for change in self.get_files_modified_after_turn(target_turn) {
            if !undo_set.contains(&change.path.as_str()) {
                undo_set.push(&change.path);
            }
        }

        // Expected on-disk state per path = the content_after of the most
        // recent checkpoint that touched it, regardless of which turn.
        let mut expected: HashMap<&str, Option<&str>> = HashMap::new();
        for checkpoint in &self.state.checkpoints {
            for change in &checkpoint.file_changes {
                expected.insert(&change.path, change.content_after.as_deref());
            }
        }

        let mut conflicts = Vec::new();
        for path in undo_set {
            let Some(expected_content) = expected.get(path) else {
                continue;
            };
            let actual = read_file_safe(Path::new(path), self.max_file_size);
            if actual.as_deref() != *expected_content {
                conflicts.push(Conflict {
                    path: path.to_string(),
                    expected_content: expected_content.map(str::to_string),
                    actual_content: actual,
                });
            }
        }
        conflicts
    }

    /// Restore the filesystem and state to the end of `turn_number`
    /// (0 = before any recorded change).
    ///
    /// Returns `(success, restored_messages, conflicts)`. With conflicts and
    /// `force = false` nothing is touched and the conflicts are returned for
    /// confirmation. Individual restore errors are reported in the message
    /// list but do not abort the remaining restorations.
    pub fn rewind_to_turn(
        &mut self,
        turn_number: u32,
        force: bool,
    ) -> (bool, Vec<String>, Vec<Conflict>) {
        if turn_number > self.state.current_turn {
            return (false, Vec::new(), Vec::new());
        }

        let conflicts = self.validate_before_rewind(turn_number);
        if !conflicts.is_empty() && !force {
            return (false, Vec::new(), conflicts);
        }

        // Restore target per path = the content_before recorded at the
        // path's earliest occurrence after the target turn. By the originals
        // invariant that equals the path's state at the end of the target
        // turn (or its pre-session state for turn 0).
        let mut restore_map: Vec<(String, Option<String>)> = Vec::new();
        for change in self.get_files_modified_after_turn(turn_number) {
            if !restore_map.iter().any(|(p, _)| p == &change.path) {
                restore_map.push((change.path.clone(), change.content_before.clone()));
            }
        }

        let mut restored = Vec::new();
        for (path, content) in restore_map {
            match content {
                None => {
                    let p = Path::new(&path);
                    if p.exists() {
                        match std::fs::remove_file(p) {
                            Ok(()) => restored.push(format!("Deleted: {path}")),
                            Err(e) => restored.push(format!("Error restoring {path}: {e}")),
                        }
                    }
                }
                Some(content) => {
                    let p = Path::new(&path);
                    let write = || -> std::io::Result<()> {
                        if let Some(parent) = p.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        std::fs::write(p, &content)
                    };
                    match write() {
                        Ok(()) => restored.push(format!("Restored: {path}")),
                        Err(e) => restored.push(format!("Error restoring {path}: {e}")),
                    }
                }
            }
        }

        self.prune_after(turn_number);
        (true, restored, conflicts)
    }

    /// Rewind the recorded state without touching the filesystem — used when
    /// the operator wants to restart the conversation from an earlier point
    /// while keeping current files.
    pub fn rewind_conversation_only(&mut self, turn_number: u32) -> bool {
        if turn_number > self.state.current_turn {
            return false;
        }
        self.prune_after(turn_number);
        true
    }

    fn prune_after(&mut self, turn_number: u32) {
        let pruned: Vec<u32> = self
            .state
            .checkpoints
            .iter()
            .filter(|c| c.turn_number > turn_number)
            .map(|c| c.turn_number)
            .collect();
        self.state
            .checkpoints
            .retain(|c| c.turn_number <= turn_number);
        self.state.current_turn = turn_number;
        for turn in pruned {
            self.store.remove_turn(turn);
        }
        self.persist();
        debug!(turn = turn_number, "rewound session state");
    }

    /// Message-log index recorded at the end of the given turn.
    pub fn get_message_index_for_turn(&self, turn_number: u32) -> Option<usize> {
        self.state
            .checkpoints
            .iter()
            .find(|c| c.turn_number == turn_number)
            .map(|c| c.message_index)
    }

    /// Save the current rewind state to disk.
    pub fn persist(&self) {
        if let Err(e) = self.store.save_rewind_state(&self.state) {
            warn!(error = %e, "failed to persist rewind state");
        }
    }

    /// Remove all stored snapshots for this session.
    pub fn cleanup(&self) {
        self.store.cleanup();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _sessions: tempfile::TempDir,
        work: tempfile::TempDir,
        mgr: RewindManager,
    }

    fn fixture() -> Fixture {
        let sessions = tempfile::TempDir::new().unwrap();
        let work = tempfile::TempDir::new().unwrap();
        let mgr = RewindManager::initialize(
            sessions.path(),
            "sess-1",
            Some(work.path()),
            Some(GitContext::default()),
        );
        Fixture {
            _sessions: sessions,
            work,
            mgr,
        }
    }

    fn write(f: &Fixture, name: &str, content: &str) -> std::path::PathBuf {
        let p = f.work.path().join(name);
        std::fs::write(&p, content).unwrap();
        p
    }

    /// Simulate a tool mutating `path` to `content` within the current turn.
    fn mutate(mgr: &mut RewindManager, path: &Path, content: &str) {
        mgr.capture_before(path);
        std::fs::write(path, content).unwrap();
        mgr.capture_after(path, Some(content.to_string()), None);
    }

    #[test]
    fn basic_edit_and_rewind_restores_each_turn_state() {
        let mut f = fixture();
        let foo = write(&f, "foo.txt", "A\n");

        f.mgr.begin_turn();
        mutate(&mut f.mgr, &foo, "B\n");
        f.mgr.end_turn(2, Some("wrote B".into()));

        f.mgr.begin_turn();
        mutate(&mut f.mgr, &foo, "C\n");
        f.mgr.end_turn(4, Some("wrote C".into()));

        assert_eq!(std::fs::read_to_string(&foo).unwrap(), "C\n");
        assert_eq!(f.mgr.current_turn(), 2);

        let (ok, restored, conflicts) = f.mgr.rewind_to_turn(1, false);
        assert!(ok);
        assert!(conflicts.is_empty());
        assert_eq!(restored.len(), 1);
        assert_eq!(std::fs::read_to_string(&foo).unwrap(), "B\n");
        assert_eq!(f.mgr.current_turn(), 1);

        let (ok, _, _) = f.mgr.rewind_to_turn(0, false);
        assert!(ok);
        assert_eq!(std::fs::read_to_string(&foo).unwrap(), "A\n");
        assert_eq!(f.mgr.current_turn(), 0);
    }

    #[test]
    fn external_modification_is_a_conflict() {
        let mut f = fixture();
        let foo = write(&f, "foo.txt", "A\n");

        f.mgr.begin_turn();
        mutate(&mut f.mgr, &foo, "B\n");
        f.mgr.end_turn(2, None);

        // Operator edits the file outside the assistant.
        std::fs::write(&foo, "Z\n").unwrap();

        let conflicts = f.mgr.validate_before_rewind(0);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].expected_content.as_deref(), Some("B\n"));
        assert_eq!(conflicts[0].actual_content.as_deref(), Some("Z\n"));

        let (ok, restored, conflicts) = f.mgr.rewind_to_turn(0, false);
        assert!(!ok);
        assert!(restored.is_empty());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(std::fs::read_to_string(&foo).unwrap(), "Z\n");

        let (ok, _, _) = f.mgr.rewind_to_turn(0, true);
        assert!(ok);
        assert_eq!(std::fs::read_to_string(&foo).unwrap(), "A\n");
    }

    #[test]
    fn multi_turn_edits_validate_against_latest_state_only() {
        let mut f = fixture();
        let foo = write(&f, "foo.txt", "v0\n");
        for (i, content) in ["v1\n", "v2\n", "v3\n"].iter().enumerate() {
            f.mgr.begin_turn();
            mutate(&mut f.mgr, &foo, content);
            f.mgr.end_turn(i * 2, None);
        }
        // File matches the newest checkpoint; older intermediate states must
        // not register as conflicts.
        assert!(f.mgr.validate_before_rewind(0).is_empty());
    }

    #[test]
    fn rewind_to_zero_deletes_files_created_during_session() {
        let mut f = fixture();
        let new_file = f.work.path().join("created.txt");

        f.mgr.begin_turn();
        mutate(&mut f.mgr, &new_file, "fresh\n");
        f.mgr.end_turn(2, None);

        assert!(new_file.exists());
        let (ok, restored, _) = f.mgr.rewind_to_turn(0, false);
        assert!(ok);
        assert!(!new_file.exists());
        assert!(restored[0].starts_with("Deleted:"), "{restored:?}");
    }

    #[test]
    fn created_file_kind_is_inferred() {
        let mut f = fixture();
        let new_file = f.work.path().join("n.txt");
        f.mgr.begin_turn();
        mutate(&mut f.mgr, &new_file, "x");
        let cp = f.mgr.end_turn(2, None);
        assert_eq!(cp.file_changes[0].kind, ChangeKind::Created);
        assert!(cp.file_changes[0].content_before.is_none());
    }

    #[test]
    fn deleted_file_kind_is_inferred() {
        let mut f = fixture();
        let target = write(&f, "d.txt", "bye\n");
        f.mgr.begin_turn();
        f.mgr.capture_before(&target);
        std::fs::remove_file(&target).unwrap();
        f.mgr.capture_after(&target, None, None);
        let cp = f.mgr.end_turn(2, None);
        assert_eq!(cp.file_changes[0].kind, ChangeKind::Deleted);

        let (ok, _, _) = f.mgr.rewind_to_turn(0, false);
        assert!(ok);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "bye\n");
    }

    #[test]
    fn capture_after_without_before_uses_recorded_original() {
        let mut f = fixture();
        let foo = write(&f, "foo.txt", "orig\n");

        f.mgr.begin_turn();
        mutate(&mut f.mgr, &foo, "turn1\n");
        f.mgr.end_turn(2, None);

        // Second turn records only the after state.
        f.mgr.begin_turn();
        std::fs::write(&foo, "turn2\n").unwrap();
        f.mgr.capture_after(&foo, Some("turn2\n".into()), None);
        let cp = f.mgr.end_turn(4, None);
        assert_eq!(cp.file_changes[0].content_before.as_deref(), Some("orig\n"));
    }

    #[test]
    fn capture_outside_turn_is_ignored() {
        let mut f = fixture();
        let foo = write(&f, "foo.txt", "A\n");
        f.mgr.capture_before(&foo);
        f.mgr.capture_after(&foo, Some("B\n".into()), None);
        f.mgr.begin_turn();
        let cp = f.mgr.end_turn(0, None);
        assert!(cp.file_changes.is_empty());
    }

    #[test]
    fn originals_entry_is_never_overwritten() {
        let mut f = fixture();
        let foo = write(&f, "foo.txt", "first\n");

        f.mgr.begin_turn();
        mutate(&mut f.mgr, &foo, "second\n");
        f.mgr.end_turn(2, None);

        f.mgr.begin_turn();
        mutate(&mut f.mgr, &foo, "third\n");
        f.mgr.end_turn(4, None);

        let key = normalize_path(&foo).to_string_lossy().into_owned();
        assert_eq!(
            f.mgr.state.originals.get(&key).unwrap().as_deref(),
            Some("first\n")
        );
    }

    #[test]
    fn current_turn_tracks_largest_checkpoint() {
        let mut f = fixture();
        for i in 0..3 {
            f.mgr.begin_turn();
            f.mgr.end_turn(i, None);
            let max = f
                .mgr
                .state
                .checkpoints
                .iter()
                .map(|c| c.turn_number)
                .max()
                .unwrap_or(0);
            assert_eq!(f.mgr.current_turn(), max);
        }
        f.mgr.rewind_to_turn(1, false);
        let max = f
            .mgr
            .state
            .checkpoints
            .iter()
            .map(|c| c.turn_number)
            .max()
            .unwrap_or(0);
        assert_eq!(f.mgr.current_turn(), max);
    }

    #[test]
    fn rewind_out_of_range_is_a_noop_failure() {
        let mut f = fixture();
        let (ok, restored, conflicts) = f.mgr.rewind_to_turn(5, false);
        assert!(!ok);
        assert!(restored.is_empty());
        assert!(conflicts.is_empty());
    }

    #[test]
    fn conversation_only_rewind_keeps_files() {
        let mut f = fixture();
        let foo = write(&f, "foo.txt", "A\n");
        f.mgr.begin_turn();
        mutate(&mut f.mgr, &foo, "B\n");
        f.mgr.end_turn(2, None);

        assert!(f.mgr.rewind_conversation_only(0));
        assert_eq!(f.mgr.current_turn(), 0);
        assert!(f.mgr.state.checkpoints.is_empty());
        assert_eq!(std::fs::read_to_string(&foo).unwrap(), "B\n");
    }

    #[test]
    fn message_index_lookup() {
        let mut f = fixture();
        f.mgr.begin_turn();
        f.mgr.end_turn(7, None);
        assert_eq!(f.mgr.get_message_index_for_turn(1), Some(7));
        assert_eq!(f.mgr.get_message_index_for_turn(9), None);
    }

    #[test]
    fn turn_summary_lookup() {
        let mut f = fixture();
        f.mgr.begin_turn();
        f.mgr.end_turn(1, Some("renamed things".into()));
        assert_eq!(f.mgr.get_turn_summary(1), Some("renamed things"));
        assert_eq!(f.mgr.get_turn_summary(2), None);
    }

    #[test]
    fn session_reloads_from_disk() {
        let sessions = tempfile::TempDir::new().unwrap();
        let work = tempfile::TempDir::new().unwrap();
        let foo = work.path().join("foo.txt");
        std::fs::write(&foo, "A\n").unwrap();

        {
            let mut mgr = RewindManager::initialize(
                sessions.path(),
                "resume-me",
                Some(work.path()),
                Some(GitContext::default()),
            );
            mgr.begin_turn();
            mutate(&mut mgr, &foo, "B\n");
            mgr.end_turn(2, Some("wrote B".into()));
        }

        let mut reloaded = RewindManager::load(sessions.path(), "resume-me").unwrap();
        assert_eq!(reloaded.current_turn(), 1);
        assert_eq!(reloaded.get_turn_summary(1), Some("wrote B"));

        let (ok, _, _) = reloaded.rewind_to_turn(0, false);
        assert!(ok);
        assert_eq!(std::fs::read_to_string(&foo).unwrap(), "A\n");
    }

    #[test]
    fn load_unknown_session_is_none() {
        let sessions = tempfile::TempDir::new().unwrap();
        assert!(RewindManager::load(sessions.path(), "ghost").is_none());
    }

    #[test]
    fn restore_errors_do_not_abort_remaining_restores() {
        let mut f = fixture();
        let a = write(&f, "a.txt", "a0\n");
        let b = write(&f, "b.txt", "b0\n");

        f.mgr.begin_turn();
        mutate(&mut f.mgr, &a, "a1\n");
        mutate(&mut f.mgr, &b, "b1\n");
        f.mgr.end_turn(2, None);

        let (ok, restored, _) = f.mgr.rewind_to_turn(0, true);
        assert!(ok);
        assert_eq!(restored.len(), 2);
        assert_eq!(std::fs::read_to_string(&a).unwrap(), "a0\n");
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "b0\n");
    }
}
