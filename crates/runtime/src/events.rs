use aish_core::{Action, ApprovalDecision, ExecutionResult, ValidationError};
use aish_exec::StreamKind;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Progress reported to the presentation layer while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Waiting on the model.
    Thinking { turn: usize, round: usize },
    /// Natural-language text from the model.
    Reply(String),
    Denied { action: Action, reason: ValidationError },
    AutoApproved { action: Action, pattern: String },
    /// Allowed, but the user said no or the session aborted.
    Declined { action: Action, decision: ApprovalDecision },
    Executing(Action),
    Output { stream: StreamKind, text: String },
    Finished { action: Action, result: ExecutionResult },
    /// The model call failed; the turn ended without actions.
    ProposerFailed(String),
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Unbounded so shell output can be forwarded from a synchronous sink.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
