//! Tool definitions offered to the model and the mapping from the model's
//! tool calls back to engine [`Action`]s.

use aish_core::{Action, OperationKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

// ── Tool specs ───────────────────────────────────────────────────────────────

/// JSON-friendly type hint for a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Boolean,
}

/// Describes a single parameter that a tool accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
    #[serde(default)]
    pub param_type: ParamType,
}

impl ToolParam {
    /// Required string parameter.
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
            param_type: ParamType::String,
        }
    }

    /// Optional string parameter.
    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            param_type: ParamType::String,
        }
    }

    pub fn flag(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            param_type: ParamType::Boolean,
            ..Self::optional(name, description)
        }
    }
}

/// Static metadata about a tool, used by the model to decide which tool to call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
    /// Engine operation the tool call turns into.
    pub operation: OperationKind,
}

impl ToolSpec {
    /// Generate the OpenAI-compatible `tools` array element for this tool.
    ///
    /// ```json
    /// {
    ///   "type": "function",
    ///   "function": {
    ///     "name": "fs_readfile",
    ///     "description": "...",
    ///     "parameters": {
    ///       "type": "object",
    ///       "properties": { ... },
    ///       "required": [...]
    ///     }
    ///   }
    /// }
    /// ```
    pub fn to_openai_tool_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<String> = Vec::new();

        for p in &self.params {
            let type_str = match p.param_type {
                ParamType::String => "string",
                ParamType::Boolean => "boolean",
            };
            properties.insert(
                p.name.clone(),
                serde_json::json!({
                    "type": type_str,
                    "description": p.description,
                }),
            );
            if p.required {
                required.push(p.name.clone());
            }
        }

        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

/// Convert a slice of `ToolSpec` into the `tools` JSON array accepted by
/// `/chat/completions`.
pub fn specs_to_openai_tools(specs: &[ToolSpec]) -> Value {
    Value::Array(specs.iter().map(|s| s.to_openai_tool_schema()).collect())
}

/// Tool name the model uses for each operation.
pub fn tool_name(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::ShellExec => "execute_shell",
        OperationKind::FsMakeDir => "fs_makedir",
        OperationKind::FsMakeFile => "fs_makefile",
        OperationKind::FsWriteFile => "fs_writefile",
        OperationKind::FsReadFile => "fs_readfile",
        OperationKind::FsListDir => "fs_listdir",
    }
}

pub fn operation_for_tool(name: &str) -> Option<OperationKind> {
    OperationKind::ALL
        .into_iter()
        .find(|kind| tool_name(*kind) == name)
}

/// The six tools every session exposes, in a stable order.
pub fn builtin_specs() -> Vec<ToolSpec> {
    let spec = |kind: OperationKind, description: &str, params: Vec<ToolParam>| ToolSpec {
        name: tool_name(kind).to_string(),
        description: description.to_string(),
        params,
        operation: kind,
    };

    vec![
        spec(
            OperationKind::ShellExec,
            "Execute a shell command with `sh -c` in the working directory and \
             return its output. Each call runs in a fresh shell; `cd` does not \
             persist between calls.",
            vec![ToolParam::required("command", "The shell command to execute")],
        ),
        spec(
            OperationKind::FsReadFile,
            "Read the contents of a UTF-8 text file.",
            vec![ToolParam::required("path", "Relative path to the file")],
        ),
        spec(
            OperationKind::FsWriteFile,
            "Write content to a file, replacing it if it exists and creating \
             missing parent directories.",
            vec![
                ToolParam::required("path", "Relative path to the file"),
                ToolParam::required("content", "Content to write"),
            ],
        ),
        spec(
            OperationKind::FsMakeFile,
            "Create a new file, optionally with initial content. Fails if the \
             file exists unless overwrite is true. Parent directories must exist.",
            vec![
                ToolParam::required("path", "Relative path to the new file"),
                ToolParam::optional("content", "Initial content (default: empty)"),
                ToolParam::flag("overwrite", "Replace an existing file (default: false)"),
            ],
        ),
        spec(
            OperationKind::FsMakeDir,
            "Create a directory and any missing parents. Fails if it exists \
             unless overwrite is true.",
            vec![
                ToolParam::required("path", "Relative path to the directory"),
                ToolParam::flag("overwrite", "Succeed if the directory already exists"),
            ],
        ),
        spec(
            OperationKind::FsListDir,
            "List the entries of a directory, sorted by name.",
            vec![ToolParam::required("path", "Relative path to the directory")],
        ),
    ]
}

// ── Tool call → Action ───────────────────────────────────────────────────────

/// Turn one model tool call into an [`Action`].
///
/// Never fails: an unknown tool name becomes an `Unknown` action, and
/// arguments that are not a JSON object (or lack the expected fields) leave
/// the corresponding fields empty so the validator denies the action with a
/// reason.  An empty `call_id` is replaced with a generated one so the result
/// can still be paired with its call.
pub fn parse_tool_call(call_id: &str, name: &str, arguments: &str) -> Action {
    let call_id = if call_id.trim().is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        call_id.to_string()
    };

    let Some(kind) = operation_for_tool(name) else {
        warn!(tool = name, "model called an unknown tool");
        return Action::unknown(name)
            .with_call_id(call_id)
            .with_raw_origin(arguments);
    };

    let args = match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!(tool = name, "tool call arguments are not a JSON object");
            serde_json::Map::new()
        }
    };

    let string_arg = |key: &str| args.get(key).and_then(Value::as_str).map(str::to_string);
    let path = string_arg("path");
    let payload = match kind {
        OperationKind::ShellExec => string_arg("command"),
        OperationKind::FsWriteFile | OperationKind::FsMakeFile => string_arg("content"),
        _ => None,
    };
    let overwrite = match args.get("overwrite") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };

    let target_path = if kind.is_fs() { path } else { None };
    Action::new(kind, target_path, payload)
        .with_overwrite(overwrite && matches!(kind, OperationKind::FsMakeDir | OperationKind::FsMakeFile))
        .with_call_id(call_id)
        .with_raw_origin(arguments)
}
