//! Results produced by each stage of the pipeline.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationResult {
    Allowed,
    Denied(ValidationError),
}

impl ValidationResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ValidationResult::Allowed)
    }

    pub fn denial(&self) -> Option<&ValidationError> {
        match self {
            ValidationResult::Allowed => None,
            ValidationResult::Denied(err) => Some(err),
        }
    }
}

/// How an allowed action was (or was not) authorised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    /// Accept-all mode and a whitelist pattern matched; carries the pattern.
    AutoApproved(String),
    UserApproved,
    UserDenied,
    /// The session was interrupted or the presentation layer went away.
    Aborted,
}

impl ApprovalDecision {
    pub fn permits_execution(&self) -> bool {
        matches!(self, ApprovalDecision::AutoApproved(_) | ApprovalDecision::UserApproved)
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalDecision::AutoApproved(pattern) => write!(f, "auto-approved (whitelist: {pattern})"),
            ApprovalDecision::UserApproved => f.write_str("approved by user"),
            ApprovalDecision::UserDenied => f.write_str("denied by user"),
            ApprovalDecision::Aborted => f.write_str("aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecStatus {
    Success,
    Failure(ExecutionError),
}

/// Outcome of running an approved action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecStatus,
    /// Stdout for shell commands; content, listing or confirmation for fs ops.
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    /// Only set for shell commands that ran to completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured output was capped; the live stream was complete.
    #[serde(default)]
    pub truncated: bool,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: ExecStatus::Success,
            output: output.into(),
            stderr: String::new(),
            exit_code: None,
            truncated: false,
            duration,
        }
    }

    pub fn failure(error: ExecutionError, duration: Duration) -> Self {
        Self {
            status: ExecStatus::Failure(error),
            output: String::new(),
            stderr: String::new(),
            exit_code: None,
            truncated: false,
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecStatus::Success)
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        match &self.status {
            ExecStatus::Success => None,
            ExecStatus::Failure(err) => Some(err),
        }
    }

    pub fn was_interrupted(&self) -> bool {
        matches!(self.status, ExecStatus::Failure(ExecutionError::Interrupted))
    }
}
