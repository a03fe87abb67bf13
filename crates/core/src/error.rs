use serde::{Deserialize, Serialize};

use crate::action::OperationKind;

/// Why the security validator refused an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ValidationError {
    #[error("operation '{0}' is disabled by security policy (security.allowed_operations)")]
    OperationDisabled(OperationKind),

    #[error(
        "path '{path}' resolves to {resolved}, outside the workspace; \
         absolute paths are not allowed (security.allow_absolute_paths)"
    )]
    AbsolutePathDenied { path: String, resolved: String },

    #[error(
        "path '{path}' is inside the aish configuration directory; \
         access is not allowed (security.allow_config_path_access)"
    )]
    ConfigPathDenied { path: String },

    #[error("file extension '{extension}' is blocked (path '{path}')")]
    ExtensionBlocked { path: String, extension: String },

    #[error("path '{path}' matches ignore pattern '{pattern}'")]
    IgnorePatternMatched { path: String, pattern: String },

    #[error("unknown or malformed operation: {0}")]
    UnknownOperation(String),
}

/// Why an approved action did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ExecutionError {
    #[error("command exited with status {0}")]
    NonZeroExit(i32),

    #[error("I/O error on '{path}': {message}")]
    Io { path: String, message: String },

    #[error("'{0}' does not exist")]
    NotFound(String),

    #[error("'{0}' is not a directory")]
    NotADirectory(String),

    #[error("'{0}' already exists (request overwrite to replace it)")]
    AlreadyExists(String),

    #[error("'{path}' is at least {size} bytes, above the {limit}-byte read limit (security.max_read_bytes)")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    #[error("execution interrupted")]
    Interrupted,
}

/// Conditions the engine cannot recover from within a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("operating system refused to create a process: {0}")]
    ResourceExhausted(String),
}

/// Reasons a session turn cannot continue.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Fatal(#[from] EngineError),

    #[error("model proposal failed: {0}")]
    Proposer(String),

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Raised when a history entry would break the execution/approval invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("an execution result requires an approving decision, got {0}")]
    ExecutionWithoutApproval(String),

    #[error("decision {0} approves execution but no result was recorded")]
    ApprovalWithoutExecution(String),
}
