// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    CompletionRequest, ModelProvider, ProviderError, ResponseEvent, ResponseStream,
};

/// Chat-completions driver for OpenAI and OpenAI-compatible gateways
/// (OpenRouter, LiteLLM proxies, local llama.cpp/Ollama servers).
///
/// One provider instance serves one configured model; the base URL decides
/// which endpoint it talks to.
pub struct OpenAiCompatProvider {
    provider_name: String,
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        provider_name: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            model: model.into(),
            api_key,
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> Result<ResponseStream, ProviderError> {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(|t| t.to_wire()).collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        debug!(
            provider = %self.provider_name,
            model = %self.model,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "sending completion request"
        );

        let mut http_req = self.client.post(self.chat_url()).json(&body);
        if let Some(key) = &self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let resp = http_req
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => ProviderError::RateLimited(body),
                500..=599 => ProviderError::ServiceUnavailable(body),
                code => ProviderError::Status {
                    provider: self.provider_name.clone(),
                    status: code,
                    body,
                },
            });
        }

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across TCP packets. Keep a line buffer
        // across chunks; emit events only for complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<Result<ResponseEvent, ProviderError>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(ProviderError::ConnectionFailed(e.to_string()))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line stays in `buf` so the next TCP chunk can
/// extend it.
pub(crate) fn drain_complete_sse_lines(
    buf: &mut String,
) -> Vec<Result<ResponseEvent, ProviderError>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

/// Parse a single complete SSE `data:` line into a [`ResponseEvent`].
///
/// Returns `None` for empty lines, comment lines, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<Result<ResponseEvent, ProviderError>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ResponseEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    Some(Ok(parse_sse_chunk(&v)))
}

fn parse_sse_chunk(v: &Value) -> ResponseEvent {
    // Usage-only chunk (emitted when stream_options.include_usage = true)
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return ResponseEvent::Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };
    }

    let delta = &v["choices"][0]["delta"];

    // Tool-call fragment. Each chunk carries at most one delta in practice;
    // the index routes accumulation in the StreamCollector.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return ResponseEvent::ToolCall {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
        };
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        return ResponseEvent::TextDelta(text.to_string());
    }

    ResponseEvent::TextDelta(String::new())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_sentinel_parses() {
        let ev = parse_sse_data_line("data: [DONE]").unwrap().unwrap();
        assert!(matches!(ev, ResponseEvent::Done));
    }

    #[test]
    fn empty_and_comment_lines_are_skipped() {
        assert!(parse_sse_data_line("").is_none());
        assert!(parse_sse_data_line(": keep-alive").is_none());
        assert!(parse_sse_data_line("data: ").is_none());
    }

    #[test]
    fn text_delta_chunk_parses() {
        let line = r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#;
        let ev = parse_sse_data_line(line).unwrap().unwrap();
        assert!(matches!(ev, ResponseEvent::TextDelta(t) if t == "hi"));
    }

    #[test]
    fn tool_call_fragment_parses_with_index() {
        let line = r#"data: {"choices":[{"delta":{"tool_calls":[{"index":2,"id":"c9","function":{"name":"grep","arguments":"{\"pa"}}]}}]}"#;
        let ev = parse_sse_data_line(line).unwrap().unwrap();
        match ev {
            ResponseEvent::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                assert_eq!(index, 2);
                assert_eq!(id, "c9");
                assert_eq!(name, "grep");
                assert_eq!(arguments, "{\"pa");
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn usage_chunk_parses() {
        let line = r#"data: {"usage":{"prompt_tokens":7,"completion_tokens":3}}"#;
        let ev = parse_sse_data_line(line).unwrap().unwrap();
        assert!(matches!(
            ev,
            ResponseEvent::Usage {
                input_tokens: 7,
                output_tokens: 3
            }
        ));
    }

    #[test]
    fn split_sse_event_survives_packet_boundary() {
        // One event arriving across two chunks must yield exactly one event.
        let mut buf = String::new();
        buf.push_str("data: {\"choices\":[{\"delta\":{\"content\":");
        assert!(drain_complete_sse_lines(&mut buf).is_empty());
        buf.push_str("\"ok\"}}]}\n");
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn crlf_lines_are_handled() {
        let mut buf = String::from("data: [DONE]\r\n");
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn chat_url_joins_without_double_slash() {
        let p = OpenAiCompatProvider::new("openai", "gpt-4o", None, "https://api.openai.com/v1/");
        assert_eq!(p.chat_url(), "https://api.openai.com/v1/chat/completions");
    }
}
