// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "tern", about = "An interactive terminal coding assistant", version)]
pub struct Cli {
    /// Explicit config file (merged on top of the standard locations)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Model to use: a `provider/model` string or an alias from config
    #[arg(short, long)]
    pub model: Option<String>,

    /// Run one prompt non-interactively and exit
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Resume a previous session by id (restores rewind checkpoints)
    #[arg(long)]
    pub resume: Option<String>,

    /// Disable the snapshot/rewind engine for this session
    #[arg(long)]
    pub no_rewind: bool,

    /// Increase log verbosity (-v debug, -vv trace); headless output only
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// MCP server operations
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },
    /// Print the resolved configuration as YAML
    ShowConfig,
    /// List discovered sub-agents
    Agents,
}

#[derive(Debug, Subcommand)]
pub enum McpCommands {
    /// Serve the built-in tools over stdio to an external MCP client
    Serve {
        /// Comma-separated subset of tool names to expose (default: all)
        #[arg(long)]
        tools: Option<String>,
    },
}
