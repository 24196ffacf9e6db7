// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tern_rewind::RewindManager;
use tern_tools::ToolRegistry;

use crate::conversation::Conversation;
use crate::hooks::HookRunner;

/// Everything one interactive session owns: the conversation, the tool
/// registry view, the hook runner, and (when enabled) the rewind manager.
///
/// There are no process-wide registries — the session value is passed by
/// reference to the turn driver and to slash-command handlers.
pub struct Session {
    pub conversation: Conversation,
    pub tools: Arc<ToolRegistry>,
    /// When set, only these tool names are advertised and dispatchable.
    /// Used by sub-agent dispatch to scope the tool view.
    pub tool_filter: Option<Vec<String>>,
    pub hooks: HookRunner,
    pub rewind: Option<RewindManager>,
}

impl Session {
    pub fn new(model: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            conversation: Conversation::new(model),
            tools,
            tool_filter: None,
            hooks: HookRunner::default(),
            rewind: None,
        }
    }

    pub fn with_hooks(mut self, hooks: HookRunner) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_rewind(mut self, rewind: RewindManager) -> Self {
        self.rewind = Some(rewind);
        self
    }

    pub fn with_tool_filter(mut self, allowed: Vec<String>) -> Self {
        self.tool_filter = Some(allowed);
        self
    }

    /// Is this tool dispatchable in this session's view?
    pub fn tool_allowed(&self, name: &str) -> bool {
        match &self.tool_filter {
            Some(allowed) => allowed.iter().any(|t| t == name),
            None => true,
        }
    }

    /// Tool schemas advertised to the model, filtered by the session's view.
    pub fn visible_schemas(&self) -> Vec<tern_model::ToolSchema> {
        self.tools
            .schemas()
            .into_iter()
            .filter(|s| self.tool_allowed(&s.name))
            .map(|s| tern_model::ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
