// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

/// A sub-agent definition loaded from an agent markdown file.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    /// When set, only these tools are available to the agent.
    pub allowed_tools: Option<Vec<String>>,
    /// When set (and `allowed_tools` is not), these tools are removed.
    pub disallowed_tools: Option<Vec<String>>,
    /// Optional per-agent model override.
    pub model: Option<String>,
    pub path: Option<PathBuf>,
}

impl AgentDefinition {
    /// The tools this agent can use, given the full tool inventory.
    ///
    /// An allow-list wins over a deny-list; with neither, everything passes.
    pub fn effective_tools(&self, all_tools: &[String]) -> Vec<String> {
        if let Some(allowed) = &self.allowed_tools {
            return allowed
                .iter()
                .filter(|t| all_tools.contains(t))
                .cloned()
                .collect();
        }
        if let Some(disallowed) = &self.disallowed_tools {
            return all_tools
                .iter()
                .filter(|t| !disallowed.contains(t))
                .cloned()
                .collect();
        }
        all_tools.to_vec()
    }
}

/// Tool lists in frontmatter accept both YAML sequences and comma-separated
/// strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => s.split(',').map(|t| t.trim().to_string()).collect(),
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    name: Option<String>,
    description: Option<String>,
    tools: Option<StringOrList>,
    #[serde(rename = "allowed-tools")]
    allowed_tools: Option<StringOrList>,
    #[serde(rename = "disallowed-tools")]
    disallowed_tools: Option<StringOrList>,
    model: Option<String>,
}

/// Parse an agent markdown file: optional YAML frontmatter between `---`
/// fences, body becomes the system prompt. Missing descriptions fall back to
/// the first non-heading body line.
pub fn parse_agent_file(path: &Path, content: &str) -> Option<AgentDefinition> {
    let (frontmatter, body) = split_frontmatter(content);
    let fm: Frontmatter = frontmatter
        .and_then(|text| serde_yaml::from_str(text).ok())
        .unwrap_or_default();

    let name = fm.name.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    if name.is_empty() {
        return None;
    }

    let body = body.trim().to_string();
    let description = fm.description.unwrap_or_default();
    let description = if description.is_empty() {
        body.lines()
            .find(|l| !l.trim().is_empty() && !l.starts_with('#'))
            .map(|l| l.trim().to_string())
            .unwrap_or_default()
    } else {
        description
    };

    Some(AgentDefinition {
        name,
        description,
        system_prompt: body,
        allowed_tools: fm.tools.or(fm.allowed_tools).map(StringOrList::into_vec),
        disallowed_tools: fm.disallowed_tools.map(StringOrList::into_vec),
        model: fm.model,
        path: Some(path.to_path_buf()),
    })
}

fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content.strip_prefix("---") else {
        return (None, content);
    };
    let Some(end) = rest.find("\n---") else {
        return (None, content);
    };
    let frontmatter = &rest[..end];
    let body = rest[end + 4..].trim_start_matches(['\r', '\n']);
    (Some(frontmatter), body)
}

/// Registry for discovering and looking up agents.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
}

impl AgentRegistry {
    /// Discover agents from the standard locations, in precedence order
    /// (later directories override earlier ones):
    ///
    /// 1. user agents: `~/.config/tern/agents/`
    /// 2. `.claude/agents/` in the project (load-time compatibility)
    /// 3. `.tern/agents/` in the project (highest priority)
    pub fn discover(project_dir: &Path) -> Self {
        let dirs = [
            tern_config::config_dir().join("agents"),
            project_dir.join(".claude/agents"),
            project_dir.join(".tern/agents"),
        ];
        Self::discover_from(&dirs)
    }

    /// Discover agents from an explicit ordered list of directories.
    pub fn discover_from(dirs: &[PathBuf]) -> Self {
        let mut registry = Self::default();
        for dir in dirs {
            registry.load_dir(dir);
        }
        registry
    }

    fn load_dir(&mut self, dir: &Path) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == "md").unwrap_or(false))
            .collect();
        paths.sort();
        for path in paths {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    if let Some(agent) = parse_agent_file(&path, &content) {
                        self.agents.insert(agent.name.clone(), agent);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read agent file"),
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.get(name)
    }

    pub fn all(&self) -> Vec<&AgentDefinition> {
        let mut agents: Vec<&AgentDefinition> = self.agents.values().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Keyword-match an agent against a task description. Name mentions
    /// weigh heaviest; description word overlap adds two per word. Scores
    /// below 3 return nothing.
    pub fn match_agent(&self, task: &str) -> Option<&AgentDefinition> {
        let task_lower = task.to_lowercase();
        let task_words: Vec<&str> = task_lower.split_whitespace().collect();

        let mut best: (usize, Option<&AgentDefinition>) = (0, None);
        for agent in self.agents.values() {
            let mut score = 0;
            if task_lower.contains(&agent.name.to_lowercase()) {
                score += 10;
            }
            let desc_lower = agent.description.to_lowercase();
            let overlap = desc_lower
                .split_whitespace()
                .filter(|w| task_words.contains(w))
                .count();
            score += overlap * 2;

            if score > best.0 {
                best = (score, Some(agent));
            }
        }

        if best.0 >= 3 {
            best.1
        } else {
            None
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
