// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-model pricing and context windows.
/// Format: (input $/1M tokens, output $/1M tokens, context window).
/// Matched by substring against the lowercased model id.
const MODEL_INFO: &[(&str, f64, f64, u32)] = &[
    ("gpt-4o-mini", 0.15, 0.60, 128_000),
    ("gpt-4o", 2.50, 10.00, 128_000),
    ("gpt-4-turbo", 10.00, 30.00, 128_000),
    ("gpt-4", 30.00, 60.00, 8_192),
    ("gpt-3.5-turbo", 0.50, 1.50, 16_385),
    ("claude-3-5-sonnet", 3.00, 15.00, 200_000),
    ("claude-3-opus", 15.00, 75.00, 200_000),
    ("claude-3-haiku", 0.25, 1.25, 200_000),
    ("gemini-1.5-pro", 1.25, 5.00, 2_000_000),
    ("gemini-1.5-flash", 0.075, 0.30, 1_000_000),
    ("command-r-plus", 3.00, 15.00, 128_000),
    ("command-r", 0.50, 1.50, 128_000),
];

/// Conservative fallback rates for unknown models.
const DEFAULT_RATES: (f64, f64) = (5.00, 15.00);

fn lookup(model: &str) -> Option<&'static (&'static str, f64, f64, u32)> {
    let lower = model.to_lowercase();
    MODEL_INFO.iter().find(|(prefix, ..)| lower.contains(prefix))
}

/// Estimated cost in USD for one completion.
pub fn estimate_cost(model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let (input_rate, output_rate) = lookup(model)
        .map(|(_, i, o, _)| (*i, *o))
        .unwrap_or(DEFAULT_RATES);
    (prompt_tokens as f64 * input_rate + completion_tokens as f64 * output_rate) / 1_000_000.0
}

/// Context window for a model, when known.
pub fn model_context_window(model: &str) -> Option<u32> {
    lookup(model).map(|(_, _, _, w)| *w)
}

/// Statistics for a single API call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStats {
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

impl UsageStats {
    pub fn from_usage(model: &str, usage: tern_model::Usage) -> Self {
        Self {
            model: model.to_string(),
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
            cost: estimate_cost(model, usage.input_tokens, usage.output_tokens),
            timestamp: Utc::now(),
        }
    }
}

/// Accumulated usage statistics for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUsage {
    pub stats: Vec<UsageStats>,
}

impl SessionUsage {
    pub fn add(&mut self, stat: UsageStats) {
        self.stats.push(stat);
    }

    pub fn total_tokens(&self) -> u32 {
        self.stats.iter().map(|s| s.total_tokens).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.stats.iter().map(|s| s.cost).sum()
    }

    pub fn prompt_tokens(&self) -> u32 {
        self.stats.iter().map(|s| s.prompt_tokens).sum()
    }

    pub fn completion_tokens(&self) -> u32 {
        self.stats.iter().map(|s| s.completion_tokens).sum()
    }

    pub fn call_count(&self) -> usize {
        self.stats.len()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_table_rates() {
        // 1M input tokens of gpt-4o = $2.50
        let cost = estimate_cost("openai/gpt-4o", 1_000_000, 0);
        assert!((cost - 2.50).abs() < 1e-9, "{cost}");
    }

    #[test]
    fn longer_prefixes_match_before_shorter_ones() {
        // gpt-4o-mini must not fall through to the gpt-4o entry.
        let cost = estimate_cost("gpt-4o-mini", 1_000_000, 0);
        assert!((cost - 0.15).abs() < 1e-9, "{cost}");
    }

    #[test]
    fn unknown_model_uses_conservative_default() {
        let cost = estimate_cost("acme/mystery-1", 1_000_000, 1_000_000);
        assert!((cost - 20.0).abs() < 1e-9, "{cost}");
    }

    #[test]
    fn context_window_lookup() {
        assert_eq!(model_context_window("openai/gpt-4o"), Some(128_000));
        assert_eq!(model_context_window("acme/mystery-1"), None);
    }

    #[test]
    fn session_usage_accumulates() {
        let mut usage = SessionUsage::default();
        usage.add(UsageStats::from_usage(
            "gpt-4o",
            tern_model::Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
        ));
        usage.add(UsageStats::from_usage(
            "gpt-4o",
            tern_model::Usage {
                input_tokens: 200,
                output_tokens: 10,
            },
        ));
        assert_eq!(usage.call_count(), 2);
        assert_eq!(usage.total_tokens(), 360);
        assert_eq!(usage.prompt_tokens(), 300);
        assert_eq!(usage.completion_tokens(), 60);
        assert!(usage.total_cost() > 0.0);
    }

    #[test]
    fn usage_stats_round_trip() {
        let stat = UsageStats::from_usage(
            "gpt-4o",
            tern_model::Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        );
        let json = serde_json::to_string(&stat).unwrap();
        let back: UsageStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_tokens, 15);
        assert_eq!(back.model, "gpt-4o");
    }
}
