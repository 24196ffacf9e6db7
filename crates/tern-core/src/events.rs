// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tern_tools::ToolCall;

/// Events emitted by the turn driver during a single turn.
/// Consumers (the CLI loop, tests) subscribe to these to drive their output.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// The complete text response (after streaming finishes)
    TextComplete(String),
    /// The model has requested a tool call
    ToolCallStarted(ToolCall),
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// Usage report for one completed model call
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        cost: f64,
    },
    /// The driver has finished processing the current user turn
    TurnComplete,
    /// A recoverable error occurred; the conversation stays coherent
    Error(String),
}
