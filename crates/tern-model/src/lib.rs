// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod collector;
mod error;
mod mock;
pub(crate) mod openai_compat;
mod provider;
mod types;

pub use collector::{CollectedResponse, StreamCollector};
pub use error::{complete_with_retry, ProviderError, MAX_RETRIES, RETRY_DELAY};
pub use mock::MockProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{ModelProvider, ResponseStream};
pub use types::*;

use std::sync::Arc;

use tern_config::Config;

/// Construct a [`ModelProvider`] for the given `provider/model` string.
///
/// The provider prefix selects the driver; credentials and base URLs come
/// from the config's provider table. Most providers speak the OpenAI wire
/// dialect and differ only in endpoint and auth.
pub fn from_config(config: &Config, model: &str) -> anyhow::Result<Arc<dyn ModelProvider>> {
    let resolved = config.resolve_model(model);
    let provider = Config::provider_for(&resolved);
    let model_name = resolved
        .split_once('/')
        .map(|(_, m)| m)
        .unwrap_or(resolved.as_str());
    let pc = config.provider_config(&resolved);

    let base_url = match (pc.api_base.as_deref(), provider) {
        (Some(base), _) => base.to_string(),
        (None, "openai") => "https://api.openai.com/v1".to_string(),
        (None, "openrouter") => "https://openrouter.ai/api/v1".to_string(),
        (None, "ollama") => "http://localhost:11434/v1".to_string(),
        (None, other) => anyhow::bail!(
            "provider {other:?} requires an api_base in the providers table"
        ),
    };

    Ok(Arc::new(OpenAiCompatProvider::new(
        provider, model_name, pc.api_key, base_url,
    )))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
