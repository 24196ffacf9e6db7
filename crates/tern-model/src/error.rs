// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use tracing::warn;

use crate::{CompletionRequest, ModelProvider, ResponseStream};

/// Maximum number of attempts for retryable provider failures.
pub const MAX_RETRIES: u32 = 3;
/// Base delay before the first retry.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Failure modes of a model provider.
///
/// `RateLimited`, `ServiceUnavailable`, and `ConnectionFailed` are transient
/// and retried with backoff; everything else surfaces immediately.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("{provider} error {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("stream decode error: {0}")]
    Decode(String),

    #[error("API call failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::ServiceUnavailable(_) | Self::ConnectionFailed(_)
        )
    }
}

/// Open a completion stream, retrying transient failures with exponential
/// backoff (1.0s × 2^attempt). Non-retryable failures surface immediately;
/// exhaustion wraps the last failure in [`ProviderError::Exhausted`].
pub async fn complete_with_retry(
    provider: &dyn ModelProvider,
    req: CompletionRequest,
) -> Result<ResponseStream, ProviderError> {
    let mut last: Option<ProviderError> = None;

    for attempt in 0..MAX_RETRIES {
        match provider.complete(req.clone()).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.is_retryable() => {
                warn!(attempt, error = %e, "retryable provider failure");
                last = Some(e);
                if attempt + 1 < MAX_RETRIES {
                    tokio::time::sleep(RETRY_DELAY * 2u32.pow(attempt)).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(ProviderError::Exhausted {
        attempts: MAX_RETRIES,
        last: Box::new(last.unwrap_or_else(|| {
            ProviderError::ConnectionFailed("no attempt was made".into())
        })),
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
