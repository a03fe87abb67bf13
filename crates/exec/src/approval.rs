//! Deciding whether an allowed action may run, and asking the user when it
//! is not pre-approved.

use aish_core::{Action, ApprovalDecision, ValidationResult};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::interrupt::Interrupt;

/// Lines of file content shown in an approval prompt.
const PREVIEW_LINES: usize = 8;

/// A request sent to the presentation layer for a yes/no answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub action: Action,
    pub validation: ValidationResult,
    /// Human-readable description plus a content preview for writes.
    pub summary: String,
}

/// The user's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserResponse {
    Approve,
    Deny,
}

/// What the approval controller wants the session to do next.
#[derive(Debug, Clone)]
pub enum Gate {
    /// Accept-all mode and the whitelist pattern matched.
    AutoApproved(String),
    NeedsUser(ApprovalRequest),
    /// Validation failed; there is nothing to approve.
    Rejected,
}

/// Channel-based approval gate.
/// The session sends an `ApprovalRequest`, and the console side responds
/// with a `UserResponse` via the oneshot.
pub type ApprovalSender = mpsc::Sender<(ApprovalRequest, oneshot::Sender<UserResponse>)>;
pub type ApprovalReceiver = mpsc::Receiver<(ApprovalRequest, oneshot::Sender<UserResponse>)>;

/// Create a new approval channel pair.
pub fn approval_channel() -> (ApprovalSender, ApprovalReceiver) {
    mpsc::channel(16)
}

/// Gate one action.
///
/// Accept-all only ever pre-approves shell commands matching the whitelist;
/// every other allowed action, fs operations included, goes to the user.
pub fn decide(
    action: &Action,
    validation: &ValidationResult,
    accept_all: bool,
    whitelist_match: Option<&str>,
) -> Gate {
    if !validation.is_allowed() {
        return Gate::Rejected;
    }
    if accept_all && action.is_shell() {
        if let Some(pattern) = whitelist_match {
            return Gate::AutoApproved(pattern.to_string());
        }
    }
    Gate::NeedsUser(ApprovalRequest {
        action: action.clone(),
        validation: validation.clone(),
        summary: summarize(action),
    })
}

/// Deliver `request` and wait for the answer.
///
/// A closed channel, a dropped reply or an interrupt while waiting all
/// resolve to [`ApprovalDecision::Aborted`].
pub async fn request_approval(
    tx: &ApprovalSender,
    request: ApprovalRequest,
    interrupt: &Interrupt,
) -> ApprovalDecision {
    let mut armed = interrupt.arm();
    let (reply_tx, reply_rx) = oneshot::channel();
    let kind = request.action.kind().to_string();

    let sent = tokio::select! {
        sent = tx.send((request, reply_tx)) => sent.is_ok(),
        () = armed.triggered() => {
            info!(kind = %kind, "approval interrupted before it was shown");
            return ApprovalDecision::Aborted;
        }
    };
    if !sent {
        warn!(kind = %kind, "approval channel closed; aborting");
        return ApprovalDecision::Aborted;
    }

    tokio::select! {
        reply = reply_rx => match reply {
            Ok(UserResponse::Approve) => ApprovalDecision::UserApproved,
            Ok(UserResponse::Deny) => ApprovalDecision::UserDenied,
            Err(_) => {
                warn!(kind = %kind, "approval reply dropped; aborting");
                ApprovalDecision::Aborted
            }
        },
        () = armed.triggered() => {
            info!(kind = %kind, "approval interrupted");
            ApprovalDecision::Aborted
        }
    }
}

fn summarize(action: &Action) -> String {
    let mut summary = action.describe();
    let content = match action.operation() {
        Some(aish_core::OperationKind::FsWriteFile | aish_core::OperationKind::FsMakeFile) => {
            action.payload().filter(|c| !c.is_empty())
        }
        _ => None,
    };
    if let Some(content) = content {
        let total = content.lines().count();
        for line in content.lines().take(PREVIEW_LINES) {
            summary.push_str("\n  | ");
            summary.push_str(line);
        }
        if total > PREVIEW_LINES {
            summary.push_str(&format!("\n  | ... ({} more lines)", total - PREVIEW_LINES));
        }
    }
    summary
}
