//! Policy checks run on every proposed action before anything else.

use std::path::Path;

use aish_core::{Action, ActionKind, OperationKind, ValidationError, ValidationResult};
use tracing::debug;

use crate::policy::{ExecutionPolicy, normalize_path};

/// Decide whether `action` may proceed to approval.
///
/// Pure: no filesystem access and no side effects, so it is safe to call
/// speculatively.  Checks run in a fixed order and the first failure wins:
/// operation permission, required fields, workspace boundary, configuration
/// directory, blocked extension, ignore patterns.  Shell actions only go
/// through the first two.
pub fn validate(action: &Action, policy: &ExecutionPolicy, workspace_root: &Path) -> ValidationResult {
    match check(action, policy, workspace_root) {
        Ok(()) => ValidationResult::Allowed,
        Err(reason) => {
            debug!(kind = %action.kind(), %reason, "action denied by policy");
            ValidationResult::Denied(reason)
        }
    }
}

fn check(action: &Action, policy: &ExecutionPolicy, workspace_root: &Path) -> Result<(), ValidationError> {
    let kind = match action.kind() {
        ActionKind::Operation(kind) => *kind,
        ActionKind::Unknown(name) => {
            return Err(ValidationError::UnknownOperation(format!(
                "the model requested '{name}', which is not a supported operation"
            )));
        }
    };
    if !policy.is_enabled(kind) {
        return Err(ValidationError::OperationDisabled(kind));
    }

    check_shape(action, kind)?;
    if !kind.is_fs() {
        return Ok(());
    }
    let Some(target) = action.target_path() else {
        return Ok(());
    };

    let root = normalize_path(workspace_root);
    let resolved = policy.resolve(&root, target);

    if !resolved.starts_with(&root) && !policy.allow_absolute_paths() {
        return Err(ValidationError::AbsolutePathDenied {
            path: target.to_string(),
            resolved: resolved.display().to_string(),
        });
    }

    if !policy.allow_config_path_access() && policy.is_config_path(&resolved) {
        return Err(ValidationError::ConfigPathDenied {
            path: target.to_string(),
        });
    }

    if let Some(extension) = policy.blocked_extension(&resolved) {
        return Err(ValidationError::ExtensionBlocked {
            path: target.to_string(),
            extension,
        });
    }

    let relative = resolved.strip_prefix(&root).unwrap_or(&resolved);
    if let Some(pattern) = policy.ignore_match(relative) {
        return Err(ValidationError::IgnorePatternMatched {
            path: target.to_string(),
            pattern: pattern.to_string(),
        });
    }

    Ok(())
}

fn check_shape(action: &Action, kind: OperationKind) -> Result<(), ValidationError> {
    let missing = |what: &str| {
        ValidationError::UnknownOperation(format!("{kind} requires {what}"))
    };

    if kind.is_fs() && action.target_path().is_none_or(|p| p.trim().is_empty()) {
        return Err(missing("a non-empty 'path'"));
    }
    match kind {
        OperationKind::ShellExec if action.command().is_none_or(|c| c.trim().is_empty()) => {
            Err(missing("a non-empty 'command'"))
        }
        OperationKind::FsWriteFile if action.payload().is_none() => Err(missing("'content'")),
        _ => Ok(()),
    }
}
