// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be on unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

fn default_bash_timeout() -> u64 {
    120
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_model() -> String {
    "openai/gpt-4o".to_string()
}

fn default_server_kind() -> String {
    "command".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Model used when the user does not pick one. Either a full
    /// `provider/model` string or an alias from `models`.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Alias table: short name → full `provider/model` string.
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Provider credentials and endpoints, keyed by provider name
    /// (the prefix of the model string).
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub rewind: RewindConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    /// External MCP servers, keyed by a display name.
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
    /// Optional system prompt override; replaces the built-in prompt entirely.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Root directory for per-session state. Defaults to
    /// `~/.config/tern/sessions`.
    #[serde(default)]
    pub sessions_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            models: HashMap::new(),
            providers: HashMap::new(),
            rewind: RewindConfig::default(),
            tools: ToolsConfig::default(),
            hooks: HooksConfig::default(),
            mcp_servers: HashMap::new(),
            system_prompt: None,
            sessions_dir: None,
        }
    }
}

impl Config {
    /// Resolve a model alias through the `models` table. Unknown names pass
    /// through unchanged (assumed to already be `provider/model` strings).
    pub fn resolve_model(&self, name: &str) -> String {
        self.models
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Extract the provider name from a `provider/model` string.
    /// A bare model name defaults to "openai".
    pub fn provider_for(model: &str) -> &str {
        model.split_once('/').map(|(p, _)| p).unwrap_or("openai")
    }

    /// Provider settings for the given model, or defaults when the provider
    /// has no entry.
    pub fn provider_config(&self, model: &str) -> ProviderConfig {
        self.providers
            .get(Self::provider_for(model))
            .cloned()
            .unwrap_or_default()
    }

    /// Validate cross-field constraints that serde cannot express.
    /// Called by the loader; violations abort startup.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, server) in &self.mcp_servers {
            server
                .validate()
                .map_err(|e| anyhow::anyhow!("mcp server {name:?}: {e}"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key; use `${VAR}` in config files to read from the environment.
    pub api_key: Option<String>,
    /// Base URL override for OpenAI-compatible gateways and local servers.
    pub api_base: Option<String>,
    /// Provider-specific extras forwarded verbatim to the driver.
    #[serde(default)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewindConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Files larger than this are not captured in snapshots.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_size: default_max_file_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default timeout for the `bash` tool, seconds.
    #[serde(default = "default_bash_timeout")]
    pub bash_timeout: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bash_timeout: default_bash_timeout(),
        }
    }
}

/// Hook tables keyed by event. Each entry matches a set of tool names and
/// names a shell command to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub pre_tool_use: Vec<HookEntry>,
    #[serde(default)]
    pub post_tool_use: Vec<HookEntry>,
}

impl HooksConfig {
    pub fn is_empty(&self) -> bool {
        self.pre_tool_use.is_empty() && self.post_tool_use.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEntry {
    /// Tool names this hook applies to. Empty = every tool.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Shell command to execute.
    pub command: String,
}

impl HookEntry {
    pub fn matches(&self, tool_name: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == tool_name)
    }
}

/// One external MCP server. Two kinds:
///
/// - `type: command` — a local process spoken to over piped stdio
/// - `type: http`    — a remote endpoint (POST requests + SSE replies)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(rename = "type", default = "default_server_kind")]
    pub kind: String,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl McpServerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.kind.as_str() {
            "command" => {
                if self.command.is_none() {
                    anyhow::bail!("command-type server requires a 'command' field");
                }
            }
            "http" => {
                if self.url.is_none() {
                    anyhow::bail!("http-type server requires a 'url' field");
                }
            }
            other => anyhow::bail!("unknown server type {other:?} (expected 'command' or 'http')"),
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.default_model, "openai/gpt-4o");
        assert!(cfg.rewind.enabled);
    }

    #[test]
    fn resolve_model_maps_alias() {
        let mut cfg = Config::default();
        cfg.models
            .insert("fast".into(), "openai/gpt-4o-mini".into());
        assert_eq!(cfg.resolve_model("fast"), "openai/gpt-4o-mini");
    }

    #[test]
    fn resolve_model_passes_unknown_through() {
        let cfg = Config::default();
        assert_eq!(cfg.resolve_model("openai/gpt-4o"), "openai/gpt-4o");
    }

    #[test]
    fn provider_for_splits_on_slash() {
        assert_eq!(Config::provider_for("anthropic/claude-sonnet-4"), "anthropic");
        assert_eq!(Config::provider_for("bare-model"), "openai");
    }

    #[test]
    fn unrecognized_fields_are_ignored() {
        let yaml = "default_model: openai/gpt-4o\nfuture_feature:\n  nested: true\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.default_model, "openai/gpt-4o");
    }

    #[test]
    fn command_server_without_command_fails_validation() {
        let yaml = "mcp_servers:\n  bad:\n    type: command\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn http_server_without_url_fails_validation() {
        let yaml = "mcp_servers:\n  bad:\n    type: http\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn server_type_defaults_to_command() {
        let yaml = "mcp_servers:\n  files:\n    command: my-server\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.mcp_servers["files"].kind, "command");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn unknown_server_type_is_rejected() {
        let yaml = "mcp_servers:\n  odd:\n    type: websocket\n    url: ws://x\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn hook_entry_empty_tools_matches_everything() {
        let entry = HookEntry {
            tools: vec![],
            command: "true".into(),
        };
        assert!(entry.matches("bash"));
        assert!(entry.matches("read"));
    }

    #[test]
    fn hook_entry_named_tools_filter() {
        let entry = HookEntry {
            tools: vec!["bash".into()],
            command: "true".into(),
        };
        assert!(entry.matches("bash"));
        assert!(!entry.matches("read"));
    }
}
