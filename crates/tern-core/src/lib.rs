// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod conversation;
pub mod driver;
pub mod events;
pub mod hooks;
pub mod session;
pub mod usage;

pub use conversation::Conversation;
pub use driver::TurnDriver;
pub use events::AgentEvent;
pub use hooks::{HookDecision, HookRunner};
pub use session::Session;
pub use usage::{estimate_cost, model_context_window, SessionUsage, UsageStats};
