// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{CompletionRequest, ProviderError, ResponseEvent};

pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<ResponseEvent, ProviderError>> + Send>>;

/// A streaming chat-completion endpoint.
///
/// Implementations are non-blocking; the only suspension points are the
/// initial request and awaiting the next streamed chunk. The stream is lazy,
/// finite, and non-restartable: text deltas arrive in submission order and
/// every text delta is yielded before any completed tool call becomes visible
/// to the consumer (fragments finalize at stream end via
/// [`crate::StreamCollector`]).
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name for status display ("openai", "mock", ...).
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> Result<ResponseStream, ProviderError>;
}
