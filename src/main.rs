// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, McpCommands};
use tern_agents::{run_agent, AgentRegistry};
use tern_core::{AgentEvent, HookRunner, Session, TurnDriver};
use tern_rewind::{GitContext, RewindManager};
use tern_tools::builtin_registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let interactive = cli.command.is_none() && cli.prompt.is_none();
    init_logging(cli.verbose, interactive);

    let config = Arc::new(tern_config::load(cli.config.as_deref())?);

    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Mcp {
                command: McpCommands::Serve { tools },
            } => {
                let registry = mcp_registry(&config, tools.as_deref());
                return tern_mcp::serve_stdio(Arc::new(registry)).await;
            }
            Commands::ShowConfig => {
                println!("{}", serde_yaml::to_string(config.as_ref()).unwrap_or_default());
                return Ok(());
            }
            Commands::Agents => {
                print_agents();
                return Ok(());
            }
        }
    }

    run_chat(cli, config).await
}

/// Build the registry exposed by `tern mcp serve`, optionally restricted to
/// a comma-separated name list.
fn mcp_registry(
    config: &tern_config::Config,
    allowed: Option<&str>,
) -> tern_tools::ToolRegistry {
    let full = builtin_registry(config.tools.bash_timeout);
    let Some(list) = allowed else { return full };
    let keep: Vec<&str> = list.split(',').map(str::trim).collect();

    let mut filtered = tern_tools::ToolRegistry::new();
    for name in keep {
        if let Some(tool) = full.get(name) {
            filtered.register_arc(tool);
        }
    }
    filtered
}

fn print_agents() {
    let cwd = std::env::current_dir().unwrap_or_default();
    let registry = AgentRegistry::discover(&cwd);
    if registry.is_empty() {
        println!("No agents found.");
        println!("Agent files are markdown with YAML frontmatter under .tern/agents/ or .claude/agents/");
        return;
    }
    for agent in registry.all() {
        println!("{:20}  {}", agent.name, agent.description);
    }
}

/// Default system prompt: role, working directory, git context, and the
/// tool inventory.
fn default_system_prompt(tool_names: &[String]) -> String {
    let cwd = std::env::current_dir()
        .map(|d| d.display().to_string())
        .unwrap_or_default();
    let git = GitContext::detect(std::path::Path::new(&cwd));
    let git_info = match git.branch {
        Some(branch) => format!("\nGit repository: Yes (branch: {branch})"),
        None => String::new(),
    };

    format!(
        "You are a helpful coding assistant running in a terminal. \
         You help users with software engineering tasks.\n\n\
         Current working directory: {cwd}{git_info}\n\n\
         You have access to tools for reading, writing, and editing files, \
         as well as running bash commands.\n\n\
         Guidelines:\n\
         - Be concise and direct in your responses\n\
         - When reading or modifying files, always use the appropriate tools\n\
         - Explain what you're doing when using tools\n\
         - If you're unsure about something, ask for clarification\n\
         - When showing file paths, use absolute paths when possible\n\n\
         Available tools: {}",
        tool_names.join(", ")
    )
}

async fn run_chat(cli: Cli, config: Arc<tern_config::Config>) -> anyhow::Result<()> {
    let model_name = config.resolve_model(
        cli.model
            .as_deref()
            .unwrap_or(config.default_model.as_str()),
    );
    let model = tern_model::from_config(&config, &model_name)?;

    let mut registry = builtin_registry(config.tools.bash_timeout);
    let _mcp_sessions = tern_mcp::connect_configured_servers(&config, &mut registry).await;
    let registry = Arc::new(registry);

    let sessions_root = tern_config::sessions_dir(&config);
    std::fs::create_dir_all(&sessions_root)
        .with_context(|| format!("creating sessions dir {}", sessions_root.display()))?;

    let mut session = Session::new(&model_name, Arc::clone(&registry))
        .with_hooks(HookRunner::new(config.hooks.clone()));

    if config.rewind.enabled && !cli.no_rewind {
        let rewind = match &cli.resume {
            Some(id) => RewindManager::load(&sessions_root, id)
                .with_context(|| format!("no session {id:?} to resume"))?,
            None => {
                let manager = RewindManager::initialize(
                    &sessions_root,
                    session.conversation.id.clone(),
                    None,
                    None,
                );
                manager.persist();
                manager
            }
        };
        session = session.with_rewind(rewind);
    }

    let prompt_text = match &config.system_prompt {
        Some(custom) => custom.clone(),
        None => default_system_prompt(&registry.names()),
    };
    session.conversation.set_system_message(prompt_text);

    let driver = TurnDriver::new(model);

    // One-shot mode: run the prompt and exit.
    if let Some(prompt) = &cli.prompt {
        run_one_turn(&driver, &mut session, prompt).await;
        return Ok(());
    }

    println!("tern {} · {model_name} · /help for commands", env!("CARGO_PKG_VERSION"));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("tern> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if let Some(command) = input.strip_prefix('/') {
            if !handle_slash_command(command, &driver, &mut session).await {
                break;
            }
            continue;
        }
        run_one_turn(&driver, &mut session, input).await;
    }

    Ok(())
}

/// Run one turn, printing events as they stream. Ctrl-C interrupts the turn
/// (not the process) at the next safe boundary.
async fn run_one_turn(driver: &TurnDriver, session: &mut Session, input: &str) {
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(event);
        }
    });

    let (cancel_tx, mut cancel_rx) = tokio::sync::oneshot::channel::<()>();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(());
        }
    });

    if let Err(e) = driver
        .run_turn_with_cancel(session, input, tx, &mut cancel_rx)
        .await
    {
        eprintln!("error: {e:#}");
    }

    interrupt.abort();
    let _ = printer.await;
}

fn print_event(event: AgentEvent) {
    match event {
        AgentEvent::TextDelta(delta) => {
            print!("{delta}");
            std::io::stdout().flush().ok();
        }
        AgentEvent::TextComplete(_) | AgentEvent::TurnComplete => {
            println!();
        }
        AgentEvent::ToolCallStarted(call) => {
            println!("⏺ {} {}", call.name, call.args);
        }
        AgentEvent::ToolCallFinished {
            tool_name,
            output,
            is_error,
            ..
        } => {
            let mark = if is_error { "✗" } else { "✓" };
            let first_line = output.lines().next().unwrap_or_default();
            println!("  {mark} {tool_name}: {first_line}");
        }
        AgentEvent::Usage {
            input_tokens,
            output_tokens,
            cost,
        } => {
            println!(
                "· {} tokens (in: {input_tokens}, out: {output_tokens}) · ${cost:.4}",
                input_tokens + output_tokens
            );
        }
        AgentEvent::Error(message) => {
            eprintln!("error: {message}");
        }
    }
}

/// Handle a `/command`. Returns false when the loop should exit.
async fn handle_slash_command(command: &str, driver: &TurnDriver, session: &mut Session) -> bool {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    match name {
        "quit" | "exit" | "q" => return false,
        "help" => {
            println!(
                "/clear               reset the conversation (keeps the system prompt)\n\
                 /compact             fold old history into a single summary message\n\
                 /usage               session token and cost totals\n\
                 /turns               recorded rewind checkpoints\n\
                 /rewind <n> [flags]  restore files and conversation to turn n\n\
                 \x20                   --force: overwrite external edits\n\
                 \x20                   --conversation: keep files, rewind history only\n\
                 /agents              list discovered sub-agents\n\
                 /agent <name> <task> run a sub-agent\n\
                 /quit                exit"
            );
        }
        "clear" => {
            session.conversation.clear();
            println!("Conversation cleared.");
        }
        "compact" => {
            let before = session.conversation.len();
            session.conversation.compact(
                6,
                "Earlier conversation history was compacted to save context. \
                 Continue from the recent messages.",
            );
            println!(
                "Compacted: {before} → {} messages.",
                session.conversation.len()
            );
        }
        "usage" => {
            let usage = &session.conversation.usage;
            println!(
                "{} calls · {} tokens (in: {}, out: {}) · ${:.4}",
                usage.call_count(),
                usage.total_tokens(),
                usage.prompt_tokens(),
                usage.completion_tokens(),
                usage.total_cost()
            );
        }
        "turns" => match &session.rewind {
            Some(rewind) => {
                if rewind.state.checkpoints.is_empty() {
                    println!("No recorded turns yet.");
                }
                for cp in &rewind.state.checkpoints {
                    println!(
                        "turn {:3}  {} file(s)  {}",
                        cp.turn_number,
                        cp.file_changes.len(),
                        cp.summary.as_deref().unwrap_or("-")
                    );
                }
            }
            None => println!("Rewind is disabled for this session."),
        },
        "rewind" => {
            let args: Vec<&str> = parts.collect();
            handle_rewind(&args, session);
        }
        "agents" => print_agents(),
        "agent" => {
            let name = parts.next().unwrap_or_default();
            let task = parts.collect::<Vec<_>>().join(" ");
            if name.is_empty() || task.is_empty() {
                println!("usage: /agent <name> <task>");
                return true;
            }
            let cwd = std::env::current_dir().unwrap_or_default();
            let registry = AgentRegistry::discover(&cwd);
            let Some(agent) = registry.get(name) else {
                println!("Unknown agent: {name}");
                return true;
            };
            let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    print_event(event);
                }
            });
            let result = run_agent(
                agent,
                &task,
                Arc::clone(driver.model()),
                &session.conversation.model,
                Arc::clone(&session.tools),
                session.hooks.clone(),
                tx,
            )
            .await;
            let _ = printer.await;
            println!("\n[{name}] {result}");
        }
        other => println!("Unknown command: /{other} (try /help)"),
    }
    true
}

fn handle_rewind(args: &[&str], session: &mut Session) {
    let Some(rewind) = session.rewind.as_mut() else {
        println!("Rewind is disabled for this session.");
        return;
    };
    let Some(turn) = args.iter().find_map(|a| a.parse::<u32>().ok()) else {
        println!("usage: /rewind <turn> [--force] [--conversation]");
        return;
    };
    let force = args.contains(&"--force");
    let conversation_only = args.contains(&"--conversation");

    if conversation_only {
        if !rewind.rewind_conversation_only(turn) {
            println!("Turn {turn} is out of range (current: {}).", rewind.current_turn());
            return;
        }
    } else {
        let (ok, restored, conflicts) = rewind.rewind_to_turn(turn, force);
        if !ok && conflicts.is_empty() {
            println!("Turn {turn} is out of range (current: {}).", rewind.current_turn());
            return;
        }
        if !ok {
            println!("Files changed outside this session; rerun with --force to overwrite:");
            for conflict in &conflicts {
                println!("  {}", conflict.path);
            }
            return;
        }
        for line in &restored {
            println!("  {line}");
        }
    }

    // The store records where the message log ended at that turn; turn 0
    // truncates to just the system prompt.
    let index = if turn == 0 {
        session
            .conversation
            .messages
            .iter()
            .filter(|m| m.role == tern_model::Role::System)
            .count()
    } else {
        rewind
            .get_message_index_for_turn(turn)
            .unwrap_or(session.conversation.len())
    };
    session.conversation.truncate(index);
    println!("Rewound to turn {turn}.");
}

fn init_logging(verbosity: u8, interactive: bool) {
    // Interactive output and log noise share a terminal; keep logs out
    // unless the operator opts in with TERN_LOG_FILE.
    if interactive {
        if let Ok(log_path) = std::env::var("TERN_LOG_FILE") {
            use std::sync::Mutex;
            if let Ok(file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
            {
                let filter =
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
                let _ = tracing_subscriber::registry()
                    .with(fmt::layer().with_target(true).with_ansi(false).with_writer(Mutex::new(file)))
                    .with(filter)
                    .try_init();
                return;
            }
        }
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::filter::LevelFilter::OFF)
            .try_init();
        return;
    }

    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
