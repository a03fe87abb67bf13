//! Compiled, read-only security policy.

use std::path::{Component, Path, PathBuf};

use aish_config::{AppConfig, OperationPermissions};
use aish_core::OperationKind;
use globset::{GlobBuilder, GlobMatcher};
use tracing::debug;

use crate::whitelist::Whitelist;

/// A pattern in the configuration could not be compiled.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid whitelist pattern '{pattern}': {reason}")]
    InvalidWhitelist { pattern: String, reason: String },

    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidIgnore { pattern: String, reason: String },
}

#[derive(Debug, Clone)]
struct IgnoreRule {
    pattern: String,
    matcher: GlobMatcher,
}

impl IgnoreRule {
    // `*` never crosses `/`; a pattern without `/` may match at any depth;
    // a trailing `/` is only a directory marker.
    fn compile(pattern: &str) -> Result<Self, PolicyError> {
        let invalid = |reason: &str| PolicyError::InvalidIgnore {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = pattern.trim();
        let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
        let trimmed = trimmed.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let source = if trimmed.contains('/') {
            trimmed.to_string()
        } else {
            format!("**/{trimmed}")
        };
        let glob = GlobBuilder::new(&source)
            .literal_separator(true)
            .build()
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            pattern: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }
}

/// Everything the validator, whitelist matcher and executor consult.
///
/// Built once per process from [`AppConfig`]; there are no setters, so a
/// session shares it behind an `Arc` without locking.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    permissions: OperationPermissions,
    allow_absolute_paths: bool,
    allow_config_path_access: bool,
    /// Lowercase, always with a leading dot.
    blocked_extensions: Vec<String>,
    ignore: Vec<IgnoreRule>,
    whitelist: Whitelist,
    /// The configuration directory as configured, plus its canonical form
    /// when that differs.
    config_dirs: Vec<PathBuf>,
    home_dir: Option<PathBuf>,
    max_read_bytes: u64,
    max_output_bytes: usize,
}

impl ExecutionPolicy {
    pub fn from_config(config: &AppConfig, config_dir: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let security = &config.security;

        let ignore = security
            .ignore_patterns
            .iter()
            .map(|p| IgnoreRule::compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        let whitelist = Whitelist::compile(&config.whitelist)?;

        let config_dir = normalize_path(config_dir.as_ref());
        let mut config_dirs = vec![config_dir.clone()];
        if let Ok(canonical) = config_dir.canonicalize() {
            if canonical != config_dir {
                config_dirs.push(canonical);
            }
        }

        let policy = Self {
            permissions: security.allowed_operations.clone(),
            allow_absolute_paths: security.allow_absolute_paths,
            allow_config_path_access: security.allow_config_path_access,
            blocked_extensions: security
                .blocked_extensions
                .iter()
                .filter_map(|ext| normalize_extension(ext))
                .collect(),
            ignore,
            whitelist,
            config_dirs,
            home_dir: std::env::var_os("HOME")
                .filter(|h| !h.is_empty())
                .map(PathBuf::from),
            max_read_bytes: security.max_read_bytes,
            max_output_bytes: security.max_output_bytes,
        };
        debug!(
            ignore_rules = policy.ignore.len(),
            whitelist = policy.whitelist.len(),
            "compiled execution policy"
        );
        Ok(policy)
    }

    /// Replace the directory `~` expands to in fs paths.
    pub fn with_home_dir(mut self, home: Option<PathBuf>) -> Self {
        self.home_dir = home;
        self
    }

    pub fn is_enabled(&self, kind: OperationKind) -> bool {
        self.permissions.is_allowed(kind)
    }

    pub fn allow_absolute_paths(&self) -> bool {
        self.allow_absolute_paths
    }

    pub fn allow_config_path_access(&self) -> bool {
        self.allow_config_path_access
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    pub fn max_read_bytes(&self) -> u64 {
        self.max_read_bytes
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    /// Lexically resolve an action path against the workspace root.
    ///
    /// Absolute targets replace the root, a leading `~` expands to the home
    /// directory, and `.`/`..` are collapsed without touching the filesystem.
    pub fn resolve(&self, workspace_root: &Path, target: &str) -> PathBuf {
        let expanded = match (target.strip_prefix('~'), &self.home_dir) {
            (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
                home.join(rest.trim_start_matches('/'))
            }
            _ => PathBuf::from(target),
        };
        normalize_path(&normalize_path(workspace_root).join(expanded))
    }

    pub fn is_config_path(&self, resolved: &Path) -> bool {
        self.config_dirs.iter().any(|dir| resolved.starts_with(dir))
    }

    /// The blocked extension of `resolved`, if any.
    pub fn blocked_extension(&self, resolved: &Path) -> Option<String> {
        let ext = extension_of(resolved)?;
        self.blocked_extensions.contains(&ext).then_some(ext)
    }

    /// First ignore pattern (in config order) matching `path` or any of its
    /// ancestors.
    pub fn ignore_match(&self, path: &Path) -> Option<&str> {
        if path.as_os_str().is_empty() {
            return None;
        }
        self.ignore.iter().find_map(|rule| {
            path.ancestors()
                .filter(|p| !p.as_os_str().is_empty())
                .any(|p| rule.matcher.is_match(p))
                .then_some(rule.pattern.as_str())
        })
    }
}

/// Lexically resolve `.` and `..` in a path *without* hitting the filesystem.
///
/// `canonicalize()` fails for paths that do not exist yet, and files about
/// to be created still need to be checked against the workspace boundary.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// `.env` for both `secrets.env` and the dotfile `.env`; lowercase.
fn extension_of(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if let Some(rest) = name.strip_prefix('.') {
        if !rest.is_empty() && !rest.contains('.') {
            return Some(name.to_ascii_lowercase());
        }
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
}

fn normalize_extension(ext: &str) -> Option<String> {
    let ext = ext.trim().trim_start_matches('.');
    (!ext.is_empty()).then(|| format!(".{}", ext.to_ascii_lowercase()))
}
