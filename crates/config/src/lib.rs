use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use aish_core::OperationKind;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable that relocates the whole configuration directory.
pub const CONFIG_DIR_ENV: &str = "AISH_CONFIG_DIR";

/// System prompt shipped with the binary; `aish regen` writes it to disk.
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../data/system_prompt.txt");

const DEFAULT_IGNORE_FILE: &str = "\
# Paths aish may never touch, one glob per line.
# A pattern without '/' matches at any depth; a trailing '/' names a directory
# and everything below it.
";

// ── LLM config ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    /// Base URL of an OpenAI-compatible API; `/chat/completions` is appended.
    /// Overridden at runtime by `AISH_API_URL` when set.
    pub api_url: String,
    /// Overridden at runtime by `AISH_MODEL` when set.
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "OpenAI".to_string(),
            api_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            max_tokens: 4096,
            request_timeout_secs: 120,
        }
    }
}

// ── Security config ──────────────────────────────────────────────────────────

/// One switch per operation, keyed the way the config file names them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationPermissions {
    #[serde(rename = "fs.makedir")]
    pub fs_makedir: bool,
    #[serde(rename = "fs.makefile")]
    pub fs_makefile: bool,
    #[serde(rename = "fs.writefile")]
    pub fs_writefile: bool,
    #[serde(rename = "fs.readfile")]
    pub fs_readfile: bool,
    #[serde(rename = "fs.listdir")]
    pub fs_listdir: bool,
    pub shell: bool,
}

impl Default for OperationPermissions {
    fn default() -> Self {
        Self {
            fs_makedir: true,
            fs_makefile: true,
            fs_writefile: true,
            fs_readfile: true,
            fs_listdir: true,
            shell: true,
        }
    }
}

impl OperationPermissions {
    pub fn is_allowed(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::ShellExec => self.shell,
            OperationKind::FsMakeDir => self.fs_makedir,
            OperationKind::FsMakeFile => self.fs_makefile,
            OperationKind::FsWriteFile => self.fs_writefile,
            OperationKind::FsReadFile => self.fs_readfile,
            OperationKind::FsListDir => self.fs_listdir,
        }
    }

    pub fn set(&mut self, kind: OperationKind, allowed: bool) {
        let slot = match kind {
            OperationKind::ShellExec => &mut self.shell,
            OperationKind::FsMakeDir => &mut self.fs_makedir,
            OperationKind::FsMakeFile => &mut self.fs_makefile,
            OperationKind::FsWriteFile => &mut self.fs_writefile,
            OperationKind::FsReadFile => &mut self.fs_readfile,
            OperationKind::FsListDir => &mut self.fs_listdir,
        };
        *slot = allowed;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub allow_absolute_paths: bool,
    pub allow_config_path_access: bool,
    /// Extensions such as `".env"`; matched case-insensitively.
    pub blocked_extensions: Vec<String>,
    pub allowed_operations: OperationPermissions,
    /// Globs checked against workspace-relative paths.  Patterns from
    /// `.aishignore` are appended after these at load time.
    pub ignore_patterns: Vec<String>,
    /// Files larger than this are refused by `fs_readfile` without reading.
    pub max_read_bytes: u64,
    /// Per-stream cap on captured shell output.  The live stream is never cut.
    pub max_output_bytes: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_absolute_paths: false,
            allow_config_path_access: false,
            blocked_extensions: vec![".env".to_string()],
            allowed_operations: OperationPermissions::default(),
            ignore_patterns: vec![],
            max_read_bytes: 1024 * 1024,
            max_output_bytes: 32 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Proposal rounds allowed per user prompt before the turn is cut off.
    pub max_rounds: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_rounds: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub security: SecurityConfig,
    /// Regexes for shell commands that `--accept-all` may run unprompted.
    pub whitelist: Vec<String>,
    pub session: SessionConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;
        }
        config.apply_env_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// `AISH_API_URL` and `AISH_MODEL` take precedence over the file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("AISH_API_URL").filter(|v| !v.is_empty()) {
            self.llm.api_url = url;
        }
        if let Some(model) = lookup("AISH_MODEL").filter(|v| !v.is_empty()) {
            self.llm.model = model;
        }
    }

    /// Read one setting by dotted key, e.g. `llm.model` or
    /// `security.allowed_operations.fs.writefile`.
    pub fn get_value(&self, key: &str) -> Result<String> {
        let root = toml::Value::try_from(self)?;
        let parts = split_key(key)?;
        let value = lookup(&root, &parts).with_context(|| format!("unknown config key: {key}"))?;
        render_value(value)
    }

    /// Update one setting by dotted key.  The new value is parsed according
    /// to the type of the current one; lists take a single item or a TOML
    /// array literal such as `["^ls", "^pwd$"]`.
    pub fn set_value(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut root = toml::Value::try_from(&*self)?;
        let parts = split_key(key)?;
        let slot =
            lookup_mut(&mut root, &parts).with_context(|| format!("unknown config key: {key}"))?;
        *slot = parse_like(slot, key, raw)?;
        *self = root
            .try_into()
            .with_context(|| format!("invalid value for {key}: {raw}"))?;
        Ok(())
    }
}

fn split_key(key: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        bail!("malformed config key: '{key}'");
    }
    Ok(parts)
}

// Table keys may themselves contain dots (`fs.makedir`), so try the longest
// joined prefix first at each level.
fn lookup<'a>(value: &'a toml::Value, parts: &[&str]) -> Option<&'a toml::Value> {
    if parts.is_empty() {
        return Some(value);
    }
    let table = value.as_table()?;
    (1..=parts.len()).rev().find_map(|i| {
        table
            .get(&parts[..i].join("."))
            .and_then(|child| lookup(child, &parts[i..]))
    })
}

fn lookup_mut<'a>(value: &'a mut toml::Value, parts: &[&str]) -> Option<&'a mut toml::Value> {
    if parts.is_empty() {
        return Some(value);
    }
    let split = (1..=parts.len()).rev().find(|&i| {
        value
            .get(parts[..i].join("."))
            .is_some_and(|child| lookup(child, &parts[i..]).is_some())
    })?;
    let child = value.as_table_mut()?.get_mut(&parts[..split].join("."))?;
    lookup_mut(child, &parts[split..])
}

fn parse_like(current: &toml::Value, key: &str, raw: &str) -> Result<toml::Value> {
    use toml::Value;

    Ok(match current {
        Value::Boolean(_) => Value::Boolean(
            raw.trim()
                .parse()
                .with_context(|| format!("{key} expects true or false, got '{raw}'"))?,
        ),
        Value::Integer(_) => Value::Integer(
            raw.trim()
                .parse()
                .with_context(|| format!("{key} expects an integer, got '{raw}'"))?,
        ),
        Value::Float(_) => Value::Float(
            raw.trim()
                .parse()
                .with_context(|| format!("{key} expects a number, got '{raw}'"))?,
        ),
        Value::String(_) => Value::String(raw.to_string()),
        Value::Array(_) => {
            if raw.trim_start().starts_with('[') {
                let table: toml::Table = toml::from_str(&format!("v = {raw}"))
                    .with_context(|| format!("{key} expects a TOML array, got '{raw}'"))?;
                table
                    .get("v")
                    .cloned()
                    .with_context(|| format!("{key} expects a TOML array, got '{raw}'"))?
            } else {
                Value::Array(vec![Value::String(raw.to_string())])
            }
        }
        Value::Table(_) => bail!("'{key}' is a section; set one of its fields instead"),
        Value::Datetime(_) => bail!("'{key}' cannot be set from the command line"),
    })
}

fn render_value(value: &toml::Value) -> Result<String> {
    Ok(match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Table(table) => toml::to_string_pretty(table)?.trim_end().to_string(),
        other => other.to_string(),
    })
}

// ── Filesystem layout ────────────────────────────────────────────────────────

/// Locations of everything aish keeps under its configuration directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    dir: PathBuf,
}

impl ConfigPaths {
    /// `$AISH_CONFIG_DIR`, else `$HOME/.aish`.
    pub fn resolve() -> Result<Self> {
        if let Some(dir) = env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::at(dir));
        }
        let home = env::var_os("HOME")
            .filter(|v| !v.is_empty())
            .context("HOME is not set; set AISH_CONFIG_DIR to choose a configuration directory")?;
        Ok(Self::at(PathBuf::from(home).join(".aish")))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join("config.toml")
    }

    pub fn tokens_file(&self) -> PathBuf {
        self.dir.join("tokens.env")
    }

    pub fn ignore_file(&self) -> PathBuf {
        self.dir.join(".aishignore")
    }

    pub fn system_prompt_file(&self) -> PathBuf {
        self.dir.join("system_prompt.txt")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }

    pub fn is_initialized(&self) -> bool {
        self.config_file().exists() && self.tokens_file().exists()
    }

    /// The config file as written, without `.aishignore` merged in.
    pub fn load_config(&self) -> Result<AppConfig> {
        AppConfig::load_from(self.config_file())
    }

    /// The config the engine runs with: file settings plus `.aishignore`.
    pub fn load_effective_config(&self) -> Result<AppConfig> {
        let mut config = self.load_config()?;
        let extra = self.load_ignore_patterns()?;
        debug!(count = extra.len(), "loaded ignore file patterns");
        config.security.ignore_patterns.extend(extra);
        Ok(config)
    }

    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        config.save_to(self.config_file())
    }

    pub fn load_api_key(&self) -> Result<String> {
        let path = self.tokens_file();
        let entries = dotenvy::from_path_iter(&path)
            .with_context(|| format!("failed to open {}; run `aish init`", path.display()))?;
        for entry in entries {
            let (key, value) =
                entry.with_context(|| format!("failed to parse {}", path.display()))?;
            if key == "API_KEY" && !value.is_empty() {
                return Ok(value);
            }
        }
        bail!("API_KEY not found in {}", path.display())
    }

    pub fn save_api_key(&self, api_key: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.tokens_file();
        fs::write(&path, format!("API_KEY={api_key}\n"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Non-empty, non-comment lines of `.aishignore`; a missing file is empty.
    pub fn load_ignore_patterns(&self) -> Result<Vec<String>> {
        let path = self.ignore_file();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// The user's template if present, else the built-in one.
    pub fn load_system_prompt(&self) -> Result<String> {
        let path = self.system_prompt_file();
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub fn write_default_system_prompt(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.system_prompt_file();
        fs::write(&path, DEFAULT_SYSTEM_PROMPT)?;
        Ok(path)
    }

    /// Write a fresh configuration directory.  Refuses to clobber an
    /// initialized one unless `force` is set; an existing `.aishignore` is
    /// always kept.
    pub fn initialize(&self, config: &AppConfig, api_key: &str, force: bool) -> Result<()> {
        if self.is_initialized() && !force {
            bail!(
                "{} is already initialized; pass --force to overwrite it",
                self.dir.display()
            );
        }
        self.save_config(config)?;
        self.save_api_key(api_key)?;
        if !self.ignore_file().exists() {
            fs::write(self.ignore_file(), DEFAULT_IGNORE_FILE)?;
        }
        self.write_default_system_prompt()?;
        Ok(())
    }
}

/// Fill the `{{CWD}}` placeholder of a system prompt template.
pub fn render_system_prompt(template: &str, cwd: &Path) -> String {
    template.replace("{{CWD}}", &cwd.display().to_string())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // ── Security-critical defaults ────────────────────────────────────────

    #[test]
    fn security_defaults_are_restrictive() {
        let cfg = AppConfig::default();
        assert!(!cfg.security.allow_absolute_paths);
        assert!(!cfg.security.allow_config_path_access);
        assert_eq!(cfg.security.blocked_extensions, vec![".env".to_string()]);
        assert!(cfg.whitelist.is_empty(), "whitelist must default to empty");
    }

    #[test]
    fn engine_limit_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.security.max_read_bytes, 1024 * 1024);
        assert_eq!(cfg.security.max_output_bytes, 32 * 1024);
        assert_eq!(cfg.session.max_rounds, 10);
        assert_eq!(cfg.telemetry.log_level, "info");
        assert_eq!(cfg.llm.api_url, "https://api.openai.com/v1");
    }

    #[test]
    fn every_operation_enabled_by_default() {
        let perms = OperationPermissions::default();
        for kind in OperationKind::ALL {
            assert!(perms.is_allowed(kind), "{kind} should default to enabled");
        }
    }

    #[test]
    fn permission_set_targets_one_kind() {
        let mut perms = OperationPermissions::default();
        perms.set(OperationKind::FsWriteFile, false);
        assert!(!perms.is_allowed(OperationKind::FsWriteFile));
        assert!(perms.is_allowed(OperationKind::FsMakeFile));
    }

    // ── load_from ──────────────────────────────────────────────────────────

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.llm.provider, "OpenAI");
        assert_eq!(cfg.session.max_rounds, 10);
    }

    #[test]
    fn load_from_uses_dotted_operation_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
whitelist = ["^ls.*", "^git status$"]

[llm]
provider = "OpenRouter"
max_tokens = 2048

[security]
allow_absolute_paths = true
blocked_extensions = [".env", ".pem"]

[security.allowed_operations]
"fs.writefile" = false
shell = false
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.llm.provider, "OpenRouter");
        assert_eq!(cfg.llm.max_tokens, 2048);
        assert!(cfg.security.allow_absolute_paths);
        assert_eq!(cfg.security.blocked_extensions, vec![".env", ".pem"]);
        assert!(!cfg.security.allowed_operations.fs_writefile);
        assert!(!cfg.security.allowed_operations.shell);
        // Unspecified operations keep their defaults.
        assert!(cfg.security.allowed_operations.fs_readfile);
        assert_eq!(cfg.whitelist, vec!["^ls.*", "^git status$"]);
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn env_overrides_replace_llm_endpoint() {
        let mut cfg = AppConfig::default();
        cfg.apply_env_overrides(|key| match key {
            "AISH_API_URL" => Some("http://localhost:8080/v1".to_string()),
            "AISH_MODEL" => Some(String::new()),
            _ => None,
        });
        assert_eq!(cfg.llm.api_url, "http://localhost:8080/v1");
        // Empty values are ignored.
        assert_eq!(cfg.llm.model, "gpt-4");
    }

    // ── save_to + roundtrip ────────────────────────────────────────────────

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/config.toml");

        let mut cfg = AppConfig::default();
        cfg.llm.model = "openai/gpt-4o".to_string();
        cfg.whitelist = vec!["^ls".to_string()];
        cfg.security.allowed_operations.fs_listdir = false;
        cfg.save_to(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"fs.listdir\" = false"));

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.llm.model, "openai/gpt-4o");
        assert_eq!(loaded.whitelist, vec!["^ls"]);
        assert!(!loaded.security.allowed_operations.fs_listdir);
    }

    // ── get_value / set_value ──────────────────────────────────────────────

    #[test]
    fn get_value_reads_nested_and_dotted_keys() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.get_value("llm.model").unwrap(), "gpt-4");
        assert_eq!(cfg.get_value("llm.max_tokens").unwrap(), "4096");
        assert_eq!(
            cfg.get_value("security.allowed_operations.fs.readfile").unwrap(),
            "true"
        );
        assert!(cfg.get_value("llm.nope").is_err());
        assert!(cfg.get_value("llm..model").is_err());
    }

    #[test]
    fn set_value_parses_by_existing_type() {
        let mut cfg = AppConfig::default();
        cfg.set_value("llm.max_tokens", "1024").unwrap();
        cfg.set_value("security.allow_absolute_paths", "true").unwrap();
        cfg.set_value("security.allowed_operations.shell", "false").unwrap();
        cfg.set_value("whitelist", r#"["^ls", "^pwd$"]"#).unwrap();
        assert_eq!(cfg.llm.max_tokens, 1024);
        assert!(cfg.security.allow_absolute_paths);
        assert!(!cfg.security.allowed_operations.shell);
        assert_eq!(cfg.whitelist, vec!["^ls", "^pwd$"]);

        cfg.set_value("whitelist", "^git (status|log)").unwrap();
        assert_eq!(cfg.whitelist, vec!["^git (status|log)"]);
    }

    #[test]
    fn set_value_rejects_bad_input() {
        let mut cfg = AppConfig::default();
        assert!(cfg.set_value("llm.max_tokens", "lots").is_err());
        assert!(cfg.set_value("security.allow_absolute_paths", "yes").is_err());
        assert!(cfg.set_value("security", "x").is_err());
        assert!(cfg.set_value("llm.temperature", "0.2").is_err());
        // Failed sets leave the config untouched.
        assert_eq!(cfg.llm.max_tokens, 4096);
    }

    // ── ConfigPaths ────────────────────────────────────────────────────────

    #[test]
    fn paths_live_under_config_dir() {
        let paths = ConfigPaths::at("/home/u/.aish");
        assert_eq!(paths.config_file(), Path::new("/home/u/.aish/config.toml"));
        assert_eq!(paths.tokens_file(), Path::new("/home/u/.aish/tokens.env"));
        assert_eq!(paths.ignore_file(), Path::new("/home/u/.aish/.aishignore"));
        assert_eq!(paths.logs_dir(), Path::new("/home/u/.aish/logs"));
    }

    #[test]
    fn api_key_roundtrip_through_tokens_file() {
        let dir = TempDir::new().unwrap();
        let paths = ConfigPaths::at(dir.path());
        assert!(paths.load_api_key().is_err());
        paths.save_api_key("sk-test-123").unwrap();
        assert_eq!(paths.load_api_key().unwrap(), "sk-test-123");
    }

    #[test]
    fn tokens_file_does_not_touch_process_environment() {
        let dir = TempDir::new().unwrap();
        let paths = ConfigPaths::at(dir.path());
        fs::write(
            paths.tokens_file(),
            "AISH_TOKENS_ONLY_DIR=/tmp/elsewhere\nAPI_KEY=sk-env\n",
        )
        .unwrap();

        assert_eq!(paths.load_api_key().unwrap(), "sk-env");
        assert!(env::var_os("AISH_TOKENS_ONLY_DIR").is_none());
        assert!(env::var_os("API_KEY").is_none_or(|v| v != "sk-env"));
    }

    #[test]
    fn ignore_file_skips_blanks_and_comments() {
        let dir = TempDir::new().unwrap();
        let paths = ConfigPaths::at(dir.path());
        assert!(paths.load_ignore_patterns().unwrap().is_empty());

        fs::write(paths.ignore_file(), "# secrets\nsecrets/*\n\n  *.key  \n").unwrap();
        assert_eq!(paths.load_ignore_patterns().unwrap(), vec!["secrets/*", "*.key"]);
    }

    #[test]
    fn effective_config_appends_ignore_file_after_config_patterns() {
        let dir = TempDir::new().unwrap();
        let paths = ConfigPaths::at(dir.path());
        let mut cfg = AppConfig::default();
        cfg.security.ignore_patterns = vec!["target/".to_string()];
        paths.save_config(&cfg).unwrap();
        fs::write(paths.ignore_file(), "secrets/*\n").unwrap();

        let effective = paths.load_effective_config().unwrap();
        assert_eq!(effective.security.ignore_patterns, vec!["target/", "secrets/*"]);
        // The file on disk is untouched.
        let raw = paths.load_config().unwrap();
        assert_eq!(raw.security.ignore_patterns, vec!["target/"]);
    }

    #[test]
    fn initialize_refuses_to_clobber_without_force() {
        let dir = TempDir::new().unwrap();
        let paths = ConfigPaths::at(dir.path().join(".aish"));
        assert!(!paths.is_initialized());

        paths.initialize(&AppConfig::default(), "key-1", false).unwrap();
        assert!(paths.is_initialized());
        assert!(paths.ignore_file().exists());
        assert!(paths.system_prompt_file().exists());

        assert!(paths.initialize(&AppConfig::default(), "key-2", false).is_err());
        paths.initialize(&AppConfig::default(), "key-2", true).unwrap();
        assert_eq!(paths.load_api_key().unwrap(), "key-2");
    }

    #[test]
    fn system_prompt_falls_back_to_builtin_and_renders_cwd() {
        let dir = TempDir::new().unwrap();
        let paths = ConfigPaths::at(dir.path());
        let template = paths.load_system_prompt().unwrap();
        assert_eq!(template, DEFAULT_SYSTEM_PROMPT);
        assert!(template.contains("{{CWD}}"));

        let rendered = render_system_prompt(&template, Path::new("/work/project"));
        assert!(rendered.contains("/work/project"));
        assert!(!rendered.contains("{{CWD}}"));

        fs::write(paths.system_prompt_file(), "custom in {{CWD}}").unwrap();
        assert_eq!(paths.load_system_prompt().unwrap(), "custom in {{CWD}}");
    }
}
