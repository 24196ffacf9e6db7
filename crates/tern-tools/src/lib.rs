// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{Tool, ToolCall, ToolOutput};

pub use builtin::bash::BashTool;
pub use builtin::edit::EditTool;
pub use builtin::glob::GlobTool;
pub use builtin::grep::GrepTool;
pub use builtin::read::ReadTool;
pub use builtin::write::WriteTool;

/// Build a registry populated with every built-in tool.
///
/// `bash_timeout` is the default timeout (seconds) for the `bash` tool.
pub fn builtin_registry(bash_timeout: u64) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(ReadTool);
    reg.register(WriteTool);
    reg.register(EditTool);
    reg.register(BashTool {
        timeout_secs: bash_timeout,
    });
    reg.register(GlobTool);
    reg.register(GrepTool);
    reg
}
