// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::Instrument;

use crate::{Tool, ToolCall, ToolOutput};

/// A tool schema – mirrors tern_model::ToolSchema but keeps the tools crate
/// independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Insert or replace by name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Insert or replace an already-shared tool (remote adapters).
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Produce schemas for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Paths the named tool declares it may mutate for the given arguments.
    /// Unknown tools declare nothing.
    pub fn mutated_paths(&self, name: &str, args: &serde_json::Value) -> Vec<PathBuf> {
        self.tools
            .get(name)
            .map(|t| t.mutated_paths(args))
            .unwrap_or_default()
    }

    /// Execute a tool by name. An unknown name yields the canonical
    /// `Error: Unknown tool '{name}'` result without consulting any
    /// executor. The executor runs in its own task so a panicking tool
    /// becomes an error result instead of tearing down the turn.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let span = tracing::info_span!("tool", name = %call.name);
        let Some(tool) = self.tools.get(&call.name).cloned() else {
            return ToolOutput::err(
                &call.id,
                format!("Error: Unknown tool '{}'", call.name),
            );
        };
        let owned_call = call.clone();
        let task = tokio::spawn(
            async move { tool.execute(&owned_call).await }.instrument(span),
        );
        match task.await {
            Ok(output) => output,
            Err(e) => ToolOutput::err(
                &call.id,
                format!("Error executing {}: {e}", call.name),
            ),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
