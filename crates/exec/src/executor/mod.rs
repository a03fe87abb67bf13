//! Running approved actions against the host shell and filesystem.

mod fs;
mod shell;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use aish_core::{Action, EngineError, ExecutionError, ExecutionResult, OperationKind};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::interrupt::Interrupt;
use crate::policy::ExecutionPolicy;

/// Which pipe a chunk of shell output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Receives shell output as it is produced, one line (or partial line) at a
/// time.
pub trait OutputSink: Send {
    fn chunk(&mut self, stream: StreamKind, text: &str);
}

impl<F> OutputSink for F
where
    F: FnMut(StreamKind, &str) + Send,
{
    fn chunk(&mut self, stream: StreamKind, text: &str) {
        self(stream, text)
    }
}

/// Executes actions that already passed validation and approval.
#[derive(Debug, Clone)]
pub struct Executor {
    policy: Arc<ExecutionPolicy>,
}

impl Executor {
    pub fn new(policy: Arc<ExecutionPolicy>) -> Self {
        Self { policy }
    }

    /// Run one action.
    ///
    /// Every ordinary failure comes back as an `ExecutionResult` with a
    /// `Failure` status; the only `Err` is the OS refusing to create a
    /// process at all.
    pub async fn execute(
        &self,
        action: &Action,
        cwd: &Path,
        workspace_root: &Path,
        sink: &mut dyn OutputSink,
        interrupt: &Interrupt,
    ) -> Result<ExecutionResult, EngineError> {
        let started = Instant::now();
        let Some(kind) = action.operation() else {
            warn!(kind = %action.kind(), "refusing to execute an unknown operation");
            return Ok(ExecutionResult::failure(
                ExecutionError::Io {
                    path: String::new(),
                    message: format!("{} cannot be executed", action.kind()),
                },
                started.elapsed(),
            ));
        };
        info!(
            kind = %kind,
            call_id = action.call_id().unwrap_or("-"),
            "executing action"
        );

        let result = match kind {
            OperationKind::ShellExec => {
                let command = action.command().unwrap_or_default();
                shell::run(
                    command,
                    cwd,
                    self.policy.max_output_bytes(),
                    sink,
                    interrupt.arm(),
                )
                .await?
            }
            _ => {
                let target = action.target_path().unwrap_or_default();
                let resolved = self.policy.resolve(workspace_root, target);
                let outcome = match kind {
                    OperationKind::FsMakeDir => fs::make_dir(target, &resolved, action.overwrite()).await,
                    OperationKind::FsMakeFile => {
                        fs::make_file(target, &resolved, action.payload(), action.overwrite()).await
                    }
                    OperationKind::FsWriteFile => {
                        fs::write_file(target, &resolved, action.payload().unwrap_or_default()).await
                    }
                    OperationKind::FsReadFile => {
                        fs::read_file(target, &resolved, self.policy.max_read_bytes()).await
                    }
                    OperationKind::FsListDir => fs::list_dir(target, &resolved).await,
                    OperationKind::ShellExec => Err(ExecutionError::Io {
                        path: target.to_string(),
                        message: "not a filesystem operation".to_string(),
                    }),
                };
                match outcome {
                    Ok(output) => ExecutionResult::success(output, started.elapsed()),
                    Err(err) => ExecutionResult::failure(err, started.elapsed()),
                }
            }
        };

        match result.error() {
            None => info!(kind = %kind, elapsed_ms = result.duration.as_millis() as u64, "action succeeded"),
            Some(err) => info!(kind = %kind, error = %err, "action failed"),
        }
        Ok(result)
    }
}

/// Find the largest byte offset ≤ `max` that falls on a UTF-8 character
/// boundary.  Safe to use as `&s[..truncate_byte_boundary(s, max)]`.
pub(crate) fn truncate_byte_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}
