//! The language-model side of a session: something that looks at the
//! conversation so far and proposes what to do next.

use std::sync::Arc;

use aish_config::render_system_prompt;
use aish_core::Action;
use aish_llm::ChatModel;
use aish_tools::{builtin_specs, parse_tool_call, specs_to_openai_tools};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::prompt_builder::build_messages;
use crate::state::SessionState;

/// Everything a proposer may look at for one round.
#[derive(Debug, Clone, Copy)]
pub struct ProposalRequest<'a> {
    pub prompt: &'a str,
    pub turn: usize,
    pub round: usize,
    /// Full history so far, including earlier rounds of this turn.
    pub state: &'a SessionState,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Proposal {
    pub reply: Option<String>,
    /// Executed in order; an empty list ends the turn.
    pub actions: Vec<Action>,
}

#[async_trait]
pub trait Proposer: Send + Sync {
    async fn propose(&self, request: ProposalRequest<'_>) -> Result<Proposal>;
}

/// Proposer backed by a chat model with the six built-in tools.
pub struct LlmProposer {
    model: Arc<dyn ChatModel>,
    system_template: String,
    tools: Value,
}

impl LlmProposer {
    /// `system_template` may contain `{{CWD}}`, replaced with the session's
    /// working directory on every request.
    pub fn new(model: Arc<dyn ChatModel>, system_template: impl Into<String>) -> Self {
        Self {
            model,
            system_template: system_template.into(),
            tools: specs_to_openai_tools(&builtin_specs()),
        }
    }
}

#[async_trait]
impl Proposer for LlmProposer {
    async fn propose(&self, request: ProposalRequest<'_>) -> Result<Proposal> {
        let system = render_system_prompt(&self.system_template, request.state.cwd());
        let messages = build_messages(&system, request.state);
        debug!(
            turn = request.turn,
            round = request.round,
            messages = messages.len(),
            "requesting proposal"
        );

        let message = self.model.chat(&messages, &self.tools).await?;
        let actions: Vec<Action> = message
            .tool_calls
            .iter()
            .map(|call| parse_tool_call(&call.id, &call.function.name, &call.function.arguments))
            .collect();
        info!(
            turn = request.turn,
            round = request.round,
            actions = actions.len(),
            "model proposed"
        );

        let reply = message
            .content
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        Ok(Proposal { reply, actions })
    }
}
