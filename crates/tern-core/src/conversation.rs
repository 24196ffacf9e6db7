// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tern_model::{Message, Role, ToolCallWire};
use uuid::Uuid;

use crate::usage::SessionUsage;

/// Ordered message log with usage accumulation and a system prompt slot.
///
/// Messages are append-only once added. The exceptions are the system
/// message (overwritten in place), [`Conversation::clear`] (which keeps the
/// system message), [`Conversation::compact`] (which replaces a prefix with a
/// synthesized assistant summary), and [`Conversation::truncate`] (rewind).
#[derive(Debug)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<Message>,
    pub model: String,
    pub usage: SessionUsage,
}

impl Conversation {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            model: model.into(),
            usage: SessionUsage::default(),
        }
    }

    /// Add or replace the system message, always kept at position 0.
    pub fn set_system_message(&mut self, content: impl Into<String>) {
        self.messages.retain(|m| m.role != Role::System);
        self.messages.insert(0, Message::system(content));
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn add_assistant_message(&mut self, content: Option<String>, calls: Vec<ToolCallWire>) {
        self.messages.push(Message::assistant_with_calls(content, calls));
    }

    pub fn add_tool_result(
        &mut self,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: impl Into<String>,
    ) {
        self.messages
            .push(Message::tool_result(call_id, tool_name, result));
    }

    /// Clear conversation history, keeping the system message.
    pub fn clear(&mut self) {
        let system = self.messages.iter().find(|m| m.role == Role::System).cloned();
        self.messages.clear();
        if let Some(system) = system {
            self.messages.push(system);
        }
    }

    /// Truncate the log to `len` messages (rewind support).
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The text of the most recent assistant message carrying text.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .find_map(|m| m.content.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Approximate token footprint of the current log.
    pub fn approx_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.approx_tokens()).sum()
    }

    /// Replace everything but the most recent `keep_recent` non-system
    /// messages with a single synthesized assistant message carrying
    /// `summary`. The split never lands inside a tool-call/result group: the
    /// kept tail is moved back until it does not begin with a tool result.
    ///
    /// No-op when there is nothing older than the kept tail.
    pub fn compact(&mut self, keep_recent: usize, summary: impl Into<String>) {
        let system = self.messages.iter().find(|m| m.role == Role::System).cloned();
        let non_system: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();

        if non_system.len() <= keep_recent {
            return;
        }
        let mut split = non_system.len() - keep_recent;
        while split > 0 && non_system[split].role == Role::Tool {
            split -= 1;
        }
        if split == 0 {
            return;
        }

        let tail = non_system[split..].to_vec();
        self.messages.clear();
        if let Some(system) = system {
            self.messages.push(system);
        }
        self.messages.push(Message::assistant(summary));
        self.messages.extend(tail);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
