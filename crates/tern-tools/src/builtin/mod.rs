// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod bash;
pub mod edit;
pub mod glob;
pub mod grep;
pub mod read;
pub mod write;

use std::path::PathBuf;

/// Resolve a user/model-supplied path: expand `~`, then anchor relative paths
/// at the current working directory.
pub(crate) fn resolve_path(raw: &str) -> PathBuf {
    let expanded = shellexpand::tilde(raw).into_owned();
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

/// Truncate a string to at most `limit` bytes, never splitting a UTF-8
/// character.
pub(crate) fn truncate_at_char_boundary(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_keeps_absolute() {
        assert_eq!(resolve_path("/tmp/x"), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn resolve_path_anchors_relative_at_cwd() {
        let resolved = resolve_path("some/file.txt");
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("some/file.txt"));
    }

    #[test]
    fn truncate_respects_char_boundary() {
        // 'é' is two bytes; cutting at 1 must back off to 0.
        assert_eq!(truncate_at_char_boundary("é", 1), "");
        assert_eq!(truncate_at_char_boundary("abc", 2), "ab");
        assert_eq!(truncate_at_char_boundary("abc", 10), "abc");
    }
}
