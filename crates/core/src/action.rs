//! Structured representation of a proposed operation.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Operation kinds ──────────────────────────────────────────────────────────

/// The six operations the engine knows how to gate and execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ShellExec,
    FsMakeDir,
    FsMakeFile,
    FsWriteFile,
    FsReadFile,
    FsListDir,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::ShellExec,
        OperationKind::FsMakeDir,
        OperationKind::FsMakeFile,
        OperationKind::FsWriteFile,
        OperationKind::FsReadFile,
        OperationKind::FsListDir,
    ];

    /// Key used for this operation in `[security.allowed_operations]`.
    pub fn config_key(self) -> &'static str {
        match self {
            OperationKind::ShellExec => "shell",
            OperationKind::FsMakeDir => "fs.makedir",
            OperationKind::FsMakeFile => "fs.makefile",
            OperationKind::FsWriteFile => "fs.writefile",
            OperationKind::FsReadFile => "fs.readfile",
            OperationKind::FsListDir => "fs.listdir",
        }
    }

    pub fn from_config_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.config_key() == key)
    }

    /// `true` for every kind that operates on a `target_path`.
    pub fn is_fs(self) -> bool {
        !matches!(self, OperationKind::ShellExec)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// What the model asked for. Anything outside the known set is kept verbatim
/// so it can still flow through validation and be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Operation(OperationKind),
    Unknown(String),
}

impl ActionKind {
    pub fn operation(&self) -> Option<OperationKind> {
        match self {
            ActionKind::Operation(kind) => Some(*kind),
            ActionKind::Unknown(_) => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Operation(kind) => kind.fmt(f),
            ActionKind::Unknown(name) => write!(f, "unknown({name})"),
        }
    }
}

impl From<OperationKind> for ActionKind {
    fn from(kind: OperationKind) -> Self {
        ActionKind::Operation(kind)
    }
}

// ── Action ───────────────────────────────────────────────────────────────────

/// A single proposed operation.
///
/// Fields are private: an `Action` is assembled once (constructor plus the
/// consuming `with_*` methods) and is read-only from then on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(default)]
    overwrite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    call_id: Option<String>,
    #[serde(default)]
    raw_origin: String,
}

impl Action {
    pub fn new(kind: impl Into<ActionKind>, target_path: Option<String>, payload: Option<String>) -> Self {
        Self {
            kind: kind.into(),
            target_path,
            payload,
            overwrite: false,
            call_id: None,
            raw_origin: String::new(),
        }
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Self::new(OperationKind::ShellExec, None, Some(command.into()))
    }

    pub fn make_dir(path: impl Into<String>) -> Self {
        Self::new(OperationKind::FsMakeDir, Some(path.into()), None)
    }

    pub fn make_file(path: impl Into<String>, content: Option<String>) -> Self {
        Self::new(OperationKind::FsMakeFile, Some(path.into()), content)
    }

    pub fn write_file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(OperationKind::FsWriteFile, Some(path.into()), Some(content.into()))
    }

    pub fn read_file(path: impl Into<String>) -> Self {
        Self::new(OperationKind::FsReadFile, Some(path.into()), None)
    }

    pub fn list_dir(path: impl Into<String>) -> Self {
        Self::new(OperationKind::FsListDir, Some(path.into()), None)
    }

    pub fn unknown(name: impl Into<String>) -> Self {
        Self::new(ActionKind::Unknown(name.into()), None, None)
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_raw_origin(mut self, raw: impl Into<String>) -> Self {
        self.raw_origin = raw.into();
        self
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub fn operation(&self) -> Option<OperationKind> {
        self.kind.operation()
    }

    pub fn target_path(&self) -> Option<&str> {
        self.target_path.as_deref()
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Shell command text, only for `ShellExec`.
    pub fn command(&self) -> Option<&str> {
        match self.operation() {
            Some(OperationKind::ShellExec) => self.payload(),
            _ => None,
        }
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn raw_origin(&self) -> &str {
        &self.raw_origin
    }

    pub fn is_shell(&self) -> bool {
        self.operation() == Some(OperationKind::ShellExec)
    }

    /// One-line human description used by approval prompts and logs.
    pub fn describe(&self) -> String {
        let path = self.target_path().unwrap_or("(no path)");
        match &self.kind {
            ActionKind::Operation(OperationKind::ShellExec) => {
                format!("Run shell command: {}", self.payload().unwrap_or("(empty)"))
            }
            ActionKind::Operation(OperationKind::FsMakeDir) => format!("Create directory: {path}"),
            ActionKind::Operation(OperationKind::FsMakeFile) => {
                if self.overwrite {
                    format!("Create file (overwrite): {path}")
                } else {
                    format!("Create file: {path}")
                }
            }
            ActionKind::Operation(OperationKind::FsWriteFile) => format!(
                "Write file: {path} ({} bytes)",
                self.payload().map(str::len).unwrap_or(0)
            ),
            ActionKind::Operation(OperationKind::FsReadFile) => format!("Read file: {path}"),
            ActionKind::Operation(OperationKind::FsListDir) => format!("List directory: {path}"),
            ActionKind::Unknown(name) => format!("Unknown operation: {name}"),
        }
    }
}
