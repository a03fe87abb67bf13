//! Chat message assembly for each proposal round.
//!
//! The whole session is replayed on every request: the system prompt, then
//! for each turn the user prompt, one assistant tool-call message per round
//! paired with a tool message per recorded action, and the turn's final
//! reply.  Only recorded actions are replayed, so every tool call the model
//! sees has exactly one result.

use aish_core::{Action, ActionKind, ApprovalDecision, ExecutionResult, HistoryEntry, OperationKind, ValidationResult};
use aish_llm::{ChatMessage, ToolCall};
use aish_tools::tool_name;
use serde_json::{Map, Value};

use crate::state::SessionState;

pub fn build_messages(system_prompt: &str, state: &SessionState) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];

    for turn in state.turns() {
        messages.push(ChatMessage::user(turn.prompt.as_str()));

        let entries: Vec<&HistoryEntry> = state.entries_for_turn(turn.turn).collect();
        for round in entries.chunk_by(|a, b| a.round() == b.round()) {
            let calls = round
                .iter()
                .enumerate()
                .map(|(i, entry)| replay_call(entry, i))
                .collect::<Vec<_>>();
            messages.push(ChatMessage::assistant(None, calls.clone()));
            for (call, entry) in calls.iter().zip(round) {
                messages.push(ChatMessage::tool_result(call.id.as_str(), tool_result_text(entry)));
            }
        }

        if let Some(reply) = &turn.reply {
            messages.push(ChatMessage::assistant(Some(reply.clone()), Vec::new()));
        }
    }
    messages
}

fn replay_call(entry: &HistoryEntry, index: usize) -> ToolCall {
    let action = entry.action();
    let id = action
        .call_id()
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{}_{}_{index}", entry.turn(), entry.round()));
    let name = match action.kind() {
        ActionKind::Operation(kind) => tool_name(*kind).to_string(),
        ActionKind::Unknown(name) => name.clone(),
    };
    ToolCall::new(id, name, replay_arguments(action))
}

/// The model's own argument text when we have it, otherwise rebuilt from
/// the action's fields.
fn replay_arguments(action: &Action) -> String {
    if !action.raw_origin().is_empty() {
        return action.raw_origin().to_string();
    }
    let mut args = Map::new();
    if let Some(path) = action.target_path() {
        args.insert("path".into(), Value::from(path));
    }
    match (action.operation(), action.payload()) {
        (Some(OperationKind::ShellExec), Some(command)) => {
            args.insert("command".into(), Value::from(command));
        }
        (Some(OperationKind::FsWriteFile | OperationKind::FsMakeFile), Some(content)) => {
            args.insert("content".into(), Value::from(content));
        }
        _ => {}
    }
    if action.overwrite() {
        args.insert("overwrite".into(), Value::Bool(true));
    }
    Value::Object(args).to_string()
}

/// What the model is told happened to one action.
pub fn tool_result_text(entry: &HistoryEntry) -> String {
    if let ValidationResult::Denied(reason) = entry.validation() {
        return format!("Denied by security policy: {reason}");
    }
    match (entry.approval(), entry.execution()) {
        (_, Some(result)) => render_execution(result),
        (Some(ApprovalDecision::UserDenied), None) => {
            "The user denied this action. Do not retry it unless asked.".to_string()
        }
        (Some(decision), None) => format!("Not executed: {decision}."),
        (None, None) => "Not executed.".to_string(),
    }
}

fn render_execution(result: &ExecutionResult) -> String {
    let mut text = match result.error() {
        None if result.output.is_empty() => "(no output)".to_string(),
        None => result.output.clone(),
        Some(err) if result.output.is_empty() => format!("Error: {err}"),
        Some(err) => format!("Error: {err}\n{}", result.output),
    };
    if !result.stderr.is_empty() {
        text.push_str("\n[stderr]\n");
        text.push_str(&result.stderr);
    }
    if let Some(code) = result.exit_code {
        text.push_str(&format!("\n[exit code: {code}]"));
    }
    if result.truncated {
        text.push_str("\n[output truncated]");
    }
    text
}
