//! Append-only audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::{HistoryError, ValidationError};
use crate::outcome::{ApprovalDecision, ExecutionResult, ValidationResult};

/// One proposed action and everything that happened to it.
///
/// Fields are private: outside of deserializing a transcript, the three
/// constructors are the only way to build an entry, and they guarantee that
/// an `execution` is present exactly when validation allowed the action and
/// the approval decision permits execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Zero-based index of the user turn this entry belongs to.
    turn: usize,
    /// Zero-based proposal round within the turn.
    round: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    action: Action,
    validation: ValidationResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    approval: Option<ApprovalDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    execution: Option<ExecutionResult>,
    recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// The validator denied the action; no approval was sought.
    pub fn rejected(
        turn: usize,
        round: usize,
        prompt: Option<String>,
        action: Action,
        reason: ValidationError,
    ) -> Self {
        Self {
            turn,
            round,
            prompt,
            action,
            validation: ValidationResult::Denied(reason),
            approval: None,
            execution: None,
            recorded_at: Utc::now(),
        }
    }

    /// The action was allowed but the user denied it or the session aborted.
    pub fn declined(
        turn: usize,
        round: usize,
        prompt: Option<String>,
        action: Action,
        decision: ApprovalDecision,
    ) -> Result<Self, HistoryError> {
        if decision.permits_execution() {
            return Err(HistoryError::ApprovalWithoutExecution(decision.to_string()));
        }
        Ok(Self {
            turn,
            round,
            prompt,
            action,
            validation: ValidationResult::Allowed,
            approval: Some(decision),
            execution: None,
            recorded_at: Utc::now(),
        })
    }

    /// The action was allowed, approved and run.
    pub fn executed(
        turn: usize,
        round: usize,
        prompt: Option<String>,
        action: Action,
        decision: ApprovalDecision,
        result: ExecutionResult,
    ) -> Result<Self, HistoryError> {
        if !decision.permits_execution() {
            return Err(HistoryError::ExecutionWithoutApproval(decision.to_string()));
        }
        Ok(Self {
            turn,
            round,
            prompt,
            action,
            validation: ValidationResult::Allowed,
            approval: Some(decision),
            execution: Some(result),
            recorded_at: Utc::now(),
        })
    }

    /// Zero-based index of the user turn.
    pub fn turn(&self) -> usize {
        self.turn
    }

    /// Zero-based proposal round within the turn.
    pub fn round(&self) -> usize {
        self.round
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn validation(&self) -> &ValidationResult {
        &self.validation
    }

    /// `None` when the validator denied the action.
    pub fn approval(&self) -> Option<&ApprovalDecision> {
        self.approval.as_ref()
    }

    pub fn execution(&self) -> Option<&ExecutionResult> {
        self.execution.as_ref()
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}
