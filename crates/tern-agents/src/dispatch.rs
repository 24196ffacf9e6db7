// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use tern_core::{AgentEvent, HookRunner, Session, TurnDriver};
use tern_model::ModelProvider;
use tern_tools::ToolRegistry;

use crate::definition::AgentDefinition;

/// Run a sub-agent: an isolated conversation whose system prompt is the
/// agent's instructions and whose tool view is filtered to the agent's
/// effective set. One turn-driver run, sequential with respect to the
/// parent turn; returns the agent's final text.
///
/// Sub-agents carry no rewind manager — their file mutations are outside the
/// parent's checkpoints and surface later as rewind conflicts.
pub async fn run_agent(
    agent: &AgentDefinition,
    task: &str,
    model: Arc<dyn ModelProvider>,
    model_name: &str,
    tools: Arc<ToolRegistry>,
    hooks: HookRunner,
    tx: mpsc::Sender<AgentEvent>,
) -> String {
    debug!(agent = %agent.name, "dispatching sub-agent");

    let effective = agent.effective_tools(&tools.names());
    let mut session = Session::new(model_name, tools)
        .with_tool_filter(effective)
        .with_hooks(hooks);

    session.conversation.set_system_message(format!(
        "You are a specialized agent: {}\n\n{}\n\nCurrent task: {}\n\n\
         Complete this task and provide a clear summary of what you found or accomplished.",
        agent.name, agent.system_prompt, task
    ));

    let driver = TurnDriver::new(model);
    if let Err(e) = driver.run_turn(&mut session, task, tx).await {
        return format!("Agent error: {e}");
    }

    session
        .conversation
        .last_assistant_text()
        .map(str::to_string)
        .unwrap_or_else(|| "Agent completed without a response".to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
