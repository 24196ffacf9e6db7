// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    CompletionRequest, ModelProvider, ProviderError, ResponseEvent, ResponseStream,
};

/// Scripted provider for tests: each call to [`ModelProvider::complete`]
/// replays the next scripted event sequence. When the script runs out, the
/// stream contains only `Done`.
pub struct MockProvider {
    scripts: Mutex<VecDeque<Vec<ResponseEvent>>>,
    /// Failures to return before the first successful stream (for retry tests).
    failures: Mutex<VecDeque<ProviderError>>,
    requests_seen: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            failures: Mutex::new(VecDeque::new()),
            requests_seen: Mutex::new(Vec::new()),
        }
    }

    /// Script a single text-only turn.
    pub fn text_turn(text: &str) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::TextDelta(text.to_string()),
            ResponseEvent::Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
            ResponseEvent::Done,
        ]
    }

    /// Script a turn that requests one tool call.
    pub fn tool_turn(id: &str, name: &str, args: &str) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::ToolCall {
                index: 0,
                id: id.to_string(),
                name: name.to_string(),
                arguments: args.to_string(),
            },
            ResponseEvent::Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
            ResponseEvent::Done,
        ]
    }

    /// Queue a failure to be returned before any scripted stream.
    pub fn push_failure(&self, err: ProviderError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// Number of completion requests observed so far.
    pub fn request_count(&self) -> usize {
        self.requests_seen.lock().unwrap().len()
    }

    /// The message log of the most recent request.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests_seen.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<ResponseStream, ProviderError> {
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.requests_seen.lock().unwrap().push(req);
        let events = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![ResponseEvent::Done]);
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
