// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use tern_model::{
    complete_with_retry, CompletionRequest, ModelProvider, ResponseEvent, StreamCollector,
    ToolCallRecord,
};
use tern_rewind::read_file_safe;
use tern_tools::ToolCall;

use crate::events::AgentEvent;
use crate::hooks::HookDecision;
use crate::session::Session;
use crate::usage::UsageStats;

/// Maximum length of the auto-derived turn summary.
const SUMMARY_CHARS: usize = 80;

/// Drives one user-initiated turn: submit, consume the stream, dispatch tool
/// calls, and re-submit until the model answers in pure text.
pub struct TurnDriver {
    model: Arc<dyn ModelProvider>,
}

impl TurnDriver {
    pub fn new(model: Arc<dyn ModelProvider>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<dyn ModelProvider> {
        &self.model
    }

    /// Replace the model provider for subsequent turns (`/model` switching).
    pub fn set_model(&mut self, model: Arc<dyn ModelProvider>) {
        self.model = model;
    }

    /// Run a turn without external cancellation.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        user_input: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        let (_keep_alive, mut cancel) = oneshot::channel::<()>();
        self.run_turn_with_cancel(session, user_input, tx, &mut cancel)
            .await
    }

    /// Run a turn with an operator-interrupt channel. Sending `()` (or
    /// dropping the sender) aborts the current model stream at the next event
    /// boundary; a tool already in flight completes first. The partial
    /// assistant message is dropped when no text had been emitted.
    pub async fn run_turn_with_cancel(
        &self,
        session: &mut Session,
        user_input: &str,
        tx: mpsc::Sender<AgentEvent>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        if let Some(rewind) = &mut session.rewind {
            rewind.begin_turn();
        }
        session.conversation.add_user_message(user_input);

        let mut iteration = 0u32;
        let mut final_text = String::new();

        'turn: loop {
            let tools = session.visible_schemas();

            // Telemetry attribution: the first call of a tool-bearing turn
            // routes, later calls synthesize tool output, tool-less turns
            // explain.
            let op_type = if tools.is_empty() {
                "explanation"
            } else if iteration == 0 {
                "routing"
            } else {
                "synthesis"
            };
            debug!(op_type, iteration, "submitting completion");

            let req = CompletionRequest {
                messages: session.conversation.messages.clone(),
                tools,
                stream: true,
            };

            let mut stream = match complete_with_retry(self.model.as_ref(), req).await {
                Ok(s) => s,
                Err(e) => {
                    // The conversation stays at its last stable point; the
                    // turn still closes so earlier tool mutations remain
                    // checkpointed.
                    let _ = tx.send(AgentEvent::Error(e.to_string())).await;
                    break 'turn;
                }
            };

            let mut collector = StreamCollector::new();
            loop {
                let item = tokio::select! {
                    biased;
                    _ = &mut *cancel => {
                        // Operator interrupt: abandon the stream. Keep the
                        // partial text only if some was already shown.
                        let collected = collector.finish();
                        if !collected.text.is_empty() {
                            session
                                .conversation
                                .add_assistant_message(Some(collected.text), vec![]);
                        }
                        break 'turn;
                    }
                    item = stream.next() => item,
                };
                let Some(event) = item else { break };
                match event {
                    Ok(ResponseEvent::Done) => break,
                    Ok(ResponseEvent::Error(msg)) => warn!("model stream error: {msg}"),
                    Ok(ResponseEvent::TextDelta(delta)) if !delta.is_empty() => {
                        let _ = tx.send(AgentEvent::TextDelta(delta.clone())).await;
                        collector.absorb(&ResponseEvent::TextDelta(delta));
                    }
                    Ok(event) => collector.absorb(&event),
                    Err(e) => {
                        let _ = tx.send(AgentEvent::Error(e.to_string())).await;
                        break 'turn;
                    }
                }
            }

            let collected = collector.finish();
            if let Some(usage) = collected.usage {
                let stat = UsageStats::from_usage(&session.conversation.model, usage);
                let _ = tx
                    .send(AgentEvent::Usage {
                        input_tokens: stat.prompt_tokens,
                        output_tokens: stat.completion_tokens,
                        cost: stat.cost,
                    })
                    .await;
                session.conversation.usage.add(stat);
            }

            if collected.text.is_empty() && collected.tool_calls.is_empty() {
                // Both empty is a provider protocol error; the conversation
                // keeps only the already-appended user message.
                let _ = tx
                    .send(AgentEvent::Error(
                        "provider returned an empty completion".into(),
                    ))
                    .await;
                break;
            }

            if !collected.text.is_empty() {
                final_text = collected.text.clone();
            }
            let wire_calls = collected.tool_calls.iter().map(|c| c.to_wire()).collect();
            let text = if collected.text.is_empty() {
                None
            } else {
                Some(collected.text.clone())
            };
            session.conversation.add_assistant_message(text, wire_calls);

            if collected.tool_calls.is_empty() {
                let _ = tx.send(AgentEvent::TextComplete(collected.text)).await;
                break;
            }

            for record in &collected.tool_calls {
                self.dispatch_tool_call(session, record, &tx).await;
            }

            iteration += 1;
        }

        if let Some(rewind) = &mut session.rewind {
            let message_index = session.conversation.len();
            let summary = derive_summary(&final_text);
            rewind.end_turn(message_index, summary);
        }

        let _ = tx.send(AgentEvent::TurnComplete).await;
        Ok(())
    }

    /// Execute one tool call: scope filter, pre-hooks, snapshot captures,
    /// registry dispatch, post-hooks, and the `tool`-role result message.
    async fn dispatch_tool_call(
        &self,
        session: &mut Session,
        record: &ToolCallRecord,
        tx: &mpsc::Sender<AgentEvent>,
    ) {
        let call = ToolCall {
            id: record.id.clone(),
            name: record.name.clone(),
            args: record.args.clone(),
        };
        let _ = tx.send(AgentEvent::ToolCallStarted(call.clone())).await;

        // Scoped sessions reject filtered tools before anything else runs.
        if !session.tool_allowed(&call.name) {
            let result = format!("Error: Tool '{}' is not available to this agent", call.name);
            finish_call(session, &call, result, true, tx).await;
            return;
        }

        if let HookDecision::Block(reason) = session.hooks.run_pre(&call.name, &call.args).await {
            let result = format!("[Hook blocked]: {reason}");
            finish_call(session, &call, result, true, tx).await;
            return;
        }

        // Snapshot every path the tool declares it may mutate.
        let targets = session.tools.mutated_paths(&call.name, &call.args);
        if let Some(rewind) = &mut session.rewind {
            for path in &targets {
                rewind.capture_before(path);
            }
        }

        let output = session.tools.execute(&call).await;
        let mut result = output.content;

        if let Some(rewind) = &mut session.rewind {
            for path in &targets {
                let content = read_file_safe(Path::new(path), tern_rewind::DEFAULT_MAX_FILE_SIZE);
                rewind.capture_after(path, content, None);
            }
        }

        if let Some(extra) = session.hooks.run_post(&call.name, &call.args, &result).await {
            result = format!("{result}\n\n{extra}");
        }

        finish_call(session, &call, result, output.is_error, tx).await;
    }
}

async fn finish_call(
    session: &mut Session,
    call: &ToolCall,
    result: String,
    is_error: bool,
    tx: &mpsc::Sender<AgentEvent>,
) {
    session
        .conversation
        .add_tool_result(&call.id, &call.name, &result);
    let _ = tx
        .send(AgentEvent::ToolCallFinished {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            output: result,
            is_error,
        })
        .await;
}

/// First 80 characters of the assistant's final text, single line.
fn derive_summary(text: &str) -> Option<String> {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.is_empty() {
        return None;
    }
    Some(flat.chars().take(SUMMARY_CHARS).collect())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tern_model::{MockProvider, ProviderError, ResponseEvent, Role};
    use tern_tools::builtin_registry;

    use super::*;

    fn channel() -> (mpsc::Sender<AgentEvent>, mpsc::Receiver<AgentEvent>) {
        mpsc::channel(256)
    }

    fn drain(rx: &mut mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn session() -> Session {
        Session::new("mock/mock-model", Arc::new(builtin_registry(120)))
    }

    #[tokio::test]
    async fn text_only_turn_appends_user_and_assistant() {
        let mock = Arc::new(MockProvider::new(vec![MockProvider::text_turn("hello!")]));
        let driver = TurnDriver::new(mock);
        let mut session = session();
        let (tx, mut rx) = channel();

        driver.run_turn(&mut session, "hi", tx).await.unwrap();

        assert_eq!(session.conversation.len(), 2);
        assert_eq!(session.conversation.messages[0].role, Role::User);
        assert_eq!(session.conversation.messages[1].role, Role::Assistant);
        assert_eq!(
            session.conversation.messages[1].content.as_deref(),
            Some("hello!")
        );

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::TextDelta(t) if t == "hello!")));
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::TurnComplete)));
    }

    #[tokio::test]
    async fn tool_turn_produces_paired_tool_messages() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("out.txt");
        let args = json!({"file_path": target, "content": "written by tool\n"}).to_string();
        let mock = Arc::new(MockProvider::new(vec![
            MockProvider::tool_turn("call_1", "write", &args),
            MockProvider::text_turn("done"),
        ]));
        let driver = TurnDriver::new(mock);
        let mut session = session();
        let (tx, _rx) = channel();

        driver
            .run_turn(&mut session, "write the file", tx)
            .await
            .unwrap();

        // user, assistant(with call), tool result, assistant(text)
        assert_eq!(session.conversation.len(), 4);
        let assistant = &session.conversation.messages[1];
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        let tool_msg = &session.conversation.messages[2];
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_msg.tool_name.as_deref(), Some("write"));
        assert!(tool_msg.content.as_deref().unwrap().starts_with("Created"));
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "written by tool\n"
        );
    }

    #[tokio::test]
    async fn every_assistant_call_gets_exactly_one_tool_result() {
        let dir = tempfile::TempDir::new().unwrap();
        let mock = Arc::new(MockProvider::new(vec![
            vec![
                ResponseEvent::ToolCall {
                    index: 0,
                    id: "a".into(),
                    name: "glob".into(),
                    arguments: json!({"pattern": "*.zz", "path": dir.path()}).to_string(),
                },
                ResponseEvent::ToolCall {
                    index: 1,
                    id: "b".into(),
                    name: "grep".into(),
                    arguments: json!({"pattern": "x", "path": dir.path()}).to_string(),
                },
                ResponseEvent::Done,
            ],
            MockProvider::text_turn("summary"),
        ]));
        let driver = TurnDriver::new(mock);
        let mut session = session();
        let (tx, _rx) = channel();

        driver.run_turn(&mut session, "go", tx).await.unwrap();

        let assistant = &session.conversation.messages[1];
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 2);
        for (i, call) in calls.iter().enumerate() {
            let reply = &session.conversation.messages[2 + i];
            assert_eq!(reply.role, Role::Tool);
            assert_eq!(reply.tool_call_id.as_deref(), Some(call.id.as_str()));
        }
    }

    #[tokio::test]
    async fn unknown_tool_yields_canonical_error_result() {
        let mock = Arc::new(MockProvider::new(vec![
            MockProvider::tool_turn("c1", "teleport", "{}"),
            MockProvider::text_turn("oh well"),
        ]));
        let driver = TurnDriver::new(mock);
        let mut session = session();
        let (tx, _rx) = channel();

        driver.run_turn(&mut session, "go", tx).await.unwrap();

        let tool_msg = &session.conversation.messages[2];
        assert_eq!(
            tool_msg.content.as_deref(),
            Some("Error: Unknown tool 'teleport'")
        );
    }

    #[tokio::test]
    async fn filtered_tool_is_rejected_without_execution() {
        let mock = Arc::new(MockProvider::new(vec![
            MockProvider::tool_turn("c1", "bash", &json!({"command": "echo hi"}).to_string()),
            MockProvider::text_turn("understood"),
        ]));
        let driver = TurnDriver::new(mock);
        let mut session = session().with_tool_filter(vec!["read".into(), "grep".into()]);
        let (tx, _rx) = channel();

        driver.run_turn(&mut session, "go", tx).await.unwrap();

        let tool_msg = &session.conversation.messages[2];
        assert_eq!(
            tool_msg.content.as_deref(),
            Some("Error: Tool 'bash' is not available to this agent")
        );
    }

    #[tokio::test]
    async fn provider_exhaustion_keeps_conversation_stable() {
        let mock = MockProvider::new(vec![]);
        for _ in 0..3 {
            mock.push_failure(ProviderError::RateLimited("429".into()));
        }
        let driver = TurnDriver::new(Arc::new(mock));
        let mut session = session();
        let (tx, mut rx) = channel();

        driver.run_turn(&mut session, "hi", tx).await.unwrap();

        // Only the user message was appended; the error surfaced as an event.
        assert_eq!(session.conversation.len(), 1);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::Error(msg) if msg.contains("3 attempts"))));
    }

    #[tokio::test]
    async fn empty_completion_is_a_protocol_error() {
        let mock = Arc::new(MockProvider::new(vec![vec![ResponseEvent::Done]]));
        let driver = TurnDriver::new(mock);
        let mut session = session();
        let (tx, mut rx) = channel();

        driver.run_turn(&mut session, "hi", tx).await.unwrap();

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::Error(msg) if msg.contains("empty completion"))));
    }

    #[tokio::test]
    async fn usage_events_accumulate_on_conversation() {
        let mock = Arc::new(MockProvider::new(vec![MockProvider::text_turn("ok")]));
        let driver = TurnDriver::new(mock);
        let mut session = session();
        let (tx, _rx) = channel();

        driver.run_turn(&mut session, "hi", tx).await.unwrap();
        assert_eq!(session.conversation.usage.call_count(), 1);
        assert_eq!(session.conversation.usage.total_tokens(), 15);
    }

    #[tokio::test]
    async fn rewind_checkpoint_captures_tool_mutation() {
        let sessions_dir = tempfile::TempDir::new().unwrap();
        let work = tempfile::TempDir::new().unwrap();
        let target = work.path().join("tracked.txt");
        std::fs::write(&target, "before\n").unwrap();

        let rewind = tern_rewind::RewindManager::initialize(
            sessions_dir.path(),
            "drv-test",
            Some(work.path()),
            Some(tern_rewind::GitContext::default()),
        );
        let args = json!({
            "file_path": target,
            "old_string": "before",
            "new_string": "after"
        })
        .to_string();
        let mock = Arc::new(MockProvider::new(vec![
            MockProvider::tool_turn("c1", "edit", &args),
            MockProvider::text_turn("edited the file"),
        ]));
        let driver = TurnDriver::new(mock);
        let mut session = session().with_rewind(rewind);
        let (tx, _rx) = channel();

        driver.run_turn(&mut session, "edit it", tx).await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "after\n");
        let rewind = session.rewind.as_mut().unwrap();
        assert_eq!(rewind.current_turn(), 1);
        let cp = &rewind.state.checkpoints[0];
        assert_eq!(cp.file_changes.len(), 1);
        assert_eq!(cp.file_changes[0].content_before.as_deref(), Some("before\n"));
        assert_eq!(cp.file_changes[0].content_after.as_deref(), Some("after\n"));
        assert_eq!(cp.message_index, session.conversation.len());
        assert_eq!(cp.summary.as_deref(), Some("edited the file"));

        // And the whole point: rewinding undoes the tool's edit.
        let (ok, _, conflicts) = rewind.rewind_to_turn(0, false);
        assert!(ok, "{conflicts:?}");
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "before\n");
    }

    #[tokio::test]
    async fn pre_hook_veto_produces_synthetic_result() {
        let hooks = crate::hooks::HookRunner::new(tern_config::HooksConfig {
            pre_tool_use: vec![tern_config::HookEntry {
                tools: vec!["bash".into()],
                command: "echo forbidden by policy; exit 1".into(),
            }],
            post_tool_use: vec![],
        });
        let mock = Arc::new(MockProvider::new(vec![
            MockProvider::tool_turn("c1", "bash", &json!({"command": "ls"}).to_string()),
            MockProvider::text_turn("noted"),
        ]));
        let driver = TurnDriver::new(mock);
        let mut session = session().with_hooks(hooks);
        let (tx, _rx) = channel();

        driver.run_turn(&mut session, "run ls", tx).await.unwrap();

        let tool_msg = &session.conversation.messages[2];
        assert_eq!(
            tool_msg.content.as_deref(),
            Some("[Hook blocked]: forbidden by policy")
        );
    }

    #[tokio::test]
    async fn post_hook_output_is_appended() {
        let hooks = crate::hooks::HookRunner::new(tern_config::HooksConfig {
            pre_tool_use: vec![],
            post_tool_use: vec![tern_config::HookEntry {
                tools: vec!["glob".into()],
                command: "echo hook says hi".into(),
            }],
        });
        let mock = Arc::new(MockProvider::new(vec![
            MockProvider::tool_turn(
                "c1",
                "glob",
                &json!({"pattern": "*.nope", "path": "/tmp"}).to_string(),
            ),
            MockProvider::text_turn("done"),
        ]));
        let driver = TurnDriver::new(mock);
        let mut session = session().with_hooks(hooks);
        let (tx, _rx) = channel();

        driver.run_turn(&mut session, "list", tx).await.unwrap();

        let tool_msg = &session.conversation.messages[2];
        assert!(
            tool_msg.content.as_deref().unwrap().ends_with("\n\nhook says hi"),
            "{:?}",
            tool_msg.content
        );
    }

    #[tokio::test]
    async fn cancellation_before_text_drops_partial_message() {
        let mock = Arc::new(MockProvider::new(vec![MockProvider::text_turn("never seen")]));
        let driver = TurnDriver::new(mock);
        let mut session = session();
        let (tx, _rx) = channel();
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        cancel_tx.send(()).unwrap();

        driver
            .run_turn_with_cancel(&mut session, "hi", tx, &mut cancel_rx)
            .await
            .unwrap();

        // The user message stays visible in history; no assistant message.
        assert_eq!(session.conversation.len(), 1);
        assert_eq!(session.conversation.messages[0].role, Role::User);
    }

    #[test]
    fn summary_is_capped_and_flattened() {
        let text = "line one\nline two   with   gaps ".repeat(10);
        let summary = derive_summary(&text).unwrap();
        assert_eq!(summary.chars().count(), 80);
        assert!(!summary.contains('\n'));
        assert!(derive_summary("").is_none());
    }
}
