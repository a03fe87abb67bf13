//! Shared data model for the aish engine: actions, stage outcomes, the error
//! taxonomy and history records.

pub mod action;
pub mod error;
pub mod history;
pub mod outcome;

pub use action::{Action, ActionKind, OperationKind};
pub use error::{EngineError, ExecutionError, HistoryError, SessionError, ValidationError};
pub use history::HistoryEntry;
pub use outcome::{ApprovalDecision, ExecStatus, ExecutionResult, ValidationResult};
