// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;
use tokio::process::Command;
use tracing::warn;

use tern_config::HooksConfig;

/// Verdict of the pre-tool hooks for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Allow,
    /// Execution vetoed; the reason becomes the synthetic tool result.
    Block(String),
}

/// Runs operator-configured hook commands around tool calls.
///
/// Hooks receive the tool name in `TERN_TOOL_NAME` and the JSON argument
/// object in `TERN_TOOL_INPUT` (post-hooks additionally get the result in
/// `TERN_TOOL_OUTPUT`). A pre-hook exiting non-zero vetoes the call; its
/// stdout becomes the reason. Post-hook stdout is appended to the tool
/// result. Hook spawn failures are logged and never fail the turn.
#[derive(Debug, Clone, Default)]
pub struct HookRunner {
    config: HooksConfig,
}

impl HookRunner {
    pub fn new(config: HooksConfig) -> Self {
        Self { config }
    }

    pub fn is_empty(&self) -> bool {
        self.config.is_empty()
    }

    /// Run all matching pre-tool hooks. The first veto wins.
    pub async fn run_pre(&self, tool_name: &str, args: &Value) -> HookDecision {
        for entry in &self.config.pre_tool_use {
            if !entry.matches(tool_name) {
                continue;
            }
            match run_hook_command(&entry.command, tool_name, args, None).await {
                Some((success, stdout)) if !success => {
                    let reason = if stdout.trim().is_empty() {
                        "Denied by hook".to_string()
                    } else {
                        stdout.trim().to_string()
                    };
                    return HookDecision::Block(reason);
                }
                _ => {}
            }
        }
        HookDecision::Allow
    }

    /// Run all matching post-tool hooks and collect their non-empty stdout.
    pub async fn run_post(&self, tool_name: &str, args: &Value, output: &str) -> Option<String> {
        let mut extra = Vec::new();
        for entry in &self.config.post_tool_use {
            if !entry.matches(tool_name) {
                continue;
            }
            if let Some((_, stdout)) =
                run_hook_command(&entry.command, tool_name, args, Some(output)).await
            {
                let trimmed = stdout.trim();
                if !trimmed.is_empty() {
                    extra.push(trimmed.to_string());
                }
            }
        }
        if extra.is_empty() {
            None
        } else {
            Some(extra.join("\n"))
        }
    }
}

/// Returns `(success, stdout)`, or `None` when the hook could not be spawned.
async fn run_hook_command(
    command: &str,
    tool_name: &str,
    args: &Value,
    tool_output: Option<&str>,
) -> Option<(bool, String)> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .env("TERN_TOOL_NAME", tool_name)
        .env("TERN_TOOL_INPUT", args.to_string())
        .stdin(std::process::Stdio::null());
    if let Some(output) = tool_output {
        cmd.env("TERN_TOOL_OUTPUT", output);
    }

    match cmd.output().await {
        Ok(out) => Some((
            out.status.success(),
            String::from_utf8_lossy(&out.stdout).into_owned(),
        )),
        Err(e) => {
            warn!(command, error = %e, "hook command failed to spawn");
            None
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tern_config::HookEntry;

    use super::*;

    fn runner(pre: Vec<HookEntry>, post: Vec<HookEntry>) -> HookRunner {
        HookRunner::new(HooksConfig {
            pre_tool_use: pre,
            post_tool_use: post,
        })
    }

    fn entry(tools: &[&str], command: &str) -> HookEntry {
        HookEntry {
            tools: tools.iter().map(|s| s.to_string()).collect(),
            command: command.to_string(),
        }
    }

    #[tokio::test]
    async fn empty_config_allows_everything() {
        let r = HookRunner::default();
        assert_eq!(r.run_pre("bash", &json!({})).await, HookDecision::Allow);
        assert!(r.run_post("bash", &json!({}), "out").await.is_none());
    }

    #[tokio::test]
    async fn failing_pre_hook_blocks_with_stdout_reason() {
        let r = runner(vec![entry(&["bash"], "echo nope; exit 1")], vec![]);
        match r.run_pre("bash", &json!({"command": "rm -rf /"})).await {
            HookDecision::Block(reason) => assert_eq!(reason, "nope"),
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_pre_hook_without_output_uses_default_reason() {
        let r = runner(vec![entry(&[], "exit 2")], vec![]);
        match r.run_pre("edit", &json!({})).await {
            HookDecision::Block(reason) => assert_eq!(reason, "Denied by hook"),
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pre_hook_for_other_tool_does_not_fire() {
        let r = runner(vec![entry(&["bash"], "exit 1")], vec![]);
        assert_eq!(r.run_pre("read", &json!({})).await, HookDecision::Allow);
    }

    #[tokio::test]
    async fn hook_sees_tool_name_and_input() {
        let r = runner(
            vec![entry(
                &[],
                "test \"$TERN_TOOL_NAME\" = bash || exit 0; \
                 echo \"$TERN_TOOL_INPUT\" | grep -q dangerous && exit 1 || exit 0",
            )],
            vec![],
        );
        assert_eq!(
            r.run_pre("bash", &json!({"command": "dangerous thing"})).await,
            HookDecision::Block("Denied by hook".into())
        );
        assert_eq!(
            r.run_pre("bash", &json!({"command": "ls"})).await,
            HookDecision::Allow
        );
    }

    #[tokio::test]
    async fn post_hook_stdout_is_collected() {
        let r = runner(vec![], vec![entry(&[], "echo extra context")]);
        let extra = r.run_post("write", &json!({}), "Created f (1 lines)").await;
        assert_eq!(extra.as_deref(), Some("extra context"));
    }

    #[tokio::test]
    async fn silent_post_hook_yields_none() {
        let r = runner(vec![], vec![entry(&[], "true")]);
        assert!(r.run_post("write", &json!({}), "ok").await.is_none());
    }

    #[tokio::test]
    async fn passing_pre_hook_allows() {
        let r = runner(vec![entry(&[], "true")], vec![]);
        assert_eq!(r.run_pre("bash", &json!({})).await, HookDecision::Allow);
    }
}
