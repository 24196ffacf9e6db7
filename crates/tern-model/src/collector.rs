// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use tracing::warn;

use crate::{ResponseEvent, ToolCallRecord, Usage};

/// Accumulates a completion stream into its final shape: full text, completed
/// tool calls, and usage.
///
/// Tool-call fragments are keyed by the per-stream `index` so out-of-order
/// fragments for the same call merge correctly; argument text concatenates per
/// index and is parsed exactly once when [`StreamCollector::finish`] runs.
/// This is what guarantees the ordering contract: completed tool calls only
/// become visible after every text delta has been absorbed.
#[derive(Default)]
pub struct StreamCollector {
    text: String,
    pending: HashMap<u32, PendingToolCall>,
    usage: Option<Usage>,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    /// Terminal parse of the accumulated argument text. Empty or malformed
    /// JSON resolves to `{}` — the call is still dispatched so the tool's own
    /// validation can report the bad input.
    fn finish(self, fallback_ord: usize) -> ToolCallRecord {
        let args = if self.args_buf.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.args_buf) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        tool_name = %self.name,
                        tool_call_id = %self.id,
                        error = %e,
                        "tool call arguments failed to parse; substituting {{}}"
                    );
                    serde_json::Value::Object(Default::default())
                }
            }
        };
        let id = if self.id.is_empty() {
            warn!(tool_name = %self.name, "tool call had empty id; generating one");
            format!("call_{fallback_ord}")
        } else {
            self.id
        };
        ToolCallRecord {
            id,
            name: self.name,
            args,
            raw_arguments: self.args_buf,
        }
    }
}

/// The finalized result of one completion stream.
pub struct CollectedResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: Option<Usage>,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one streamed event. `Done` and `Error` are no-ops here; the
    /// caller drives the stream and decides when to call [`Self::finish`].
    pub fn absorb(&mut self, event: &ResponseEvent) {
        match event {
            ResponseEvent::TextDelta(delta) => self.text.push_str(delta),
            ResponseEvent::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let ptc = self.pending.entry(*index).or_default();
                if !id.is_empty() {
                    ptc.id = id.clone();
                }
                if !name.is_empty() {
                    ptc.name = name.clone();
                }
                ptc.args_buf.push_str(arguments);
            }
            ResponseEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                self.usage = Some(Usage {
                    input_tokens: *input_tokens,
                    output_tokens: *output_tokens,
                });
            }
            ResponseEvent::Done | ResponseEvent::Error(_) => {}
        }
    }

    /// Finalize: sort calls by stream index, parse argument buffers, drop
    /// calls the model never named (they cannot be dispatched).
    pub fn finish(self) -> CollectedResponse {
        let mut pending: Vec<(u32, PendingToolCall)> = self.pending.into_iter().collect();
        pending.sort_by_key(|(idx, _)| *idx);

        let mut tool_calls = Vec::with_capacity(pending.len());
        for (i, (_, ptc)) in pending.into_iter().enumerate() {
            if ptc.name.is_empty() {
                warn!(tool_call_id = %ptc.id, "dropping tool call with empty name");
                continue;
            }
            tool_calls.push(ptc.finish(i));
        }

        CollectedResponse {
            text: self.text,
            tool_calls,
            usage: self.usage,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
