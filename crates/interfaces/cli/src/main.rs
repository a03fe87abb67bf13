mod commands;
mod console;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use aish_config::ConfigPaths;
use aish_core::SessionError;
use aish_exec::{ExecutionPolicy, Interrupt, approval_channel};
use aish_llm::ChatClient;
use aish_runtime::{LlmProposer, Session, SessionOptions, event_channel};

#[derive(Debug, Parser)]
#[command(
    name = "aish",
    version,
    about = "Ask for shell and file work in plain language; every action is checked and confirmed"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Run whitelisted shell commands without asking
    #[arg(long)]
    accept_all: bool,

    /// Keep the conversation open and read further prompts
    #[arg(short, long)]
    interactive: bool,

    /// Write the session transcript (JSON Lines) to this file on exit
    #[arg(long, value_name = "PATH")]
    transcript: Option<PathBuf>,

    /// The request, e.g. `aish convert every png in assets to webp`
    #[arg(trailing_var_arg = true)]
    prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create ~/.aish with a config file, API key and system prompt
    Init {
        #[arg(long, value_enum, default_value = "openai")]
        provider: ProviderPreset,
        /// Base URL of an OpenAI-compatible API (overrides the preset)
        #[arg(long)]
        api_url: Option<String>,
        /// Model name (overrides the preset)
        #[arg(long)]
        model: Option<String>,
        /// API key; read from stdin when omitted
        #[arg(long)]
        api_key: Option<String>,
        /// Skip the test request that checks the key
        #[arg(long)]
        no_verify: bool,
        /// Replace an existing configuration
        #[arg(long)]
        force: bool,
    },
    /// Show all settings, or get/set one (e.g. `aish config llm.max_tokens 2048`)
    Config { key: Option<String>, value: Option<String> },
    /// Rewrite system_prompt.txt with the built-in default
    Regen,
    /// Print the system prompt currently in use
    Showsystem,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum ProviderPreset {
    Openai,
    Openrouter,
    Custom,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A `.env` in the working directory is workspace content and is never
    // loaded; the API key comes from tokens.env only.
    let cli = Cli::parse();
    let paths = ConfigPaths::resolve()?;
    let _log_guard = init_logging(&paths);

    match cli.command {
        Some(Commands::Init {
            provider,
            api_url,
            model,
            api_key,
            no_verify,
            force,
        }) => {
            let options = commands::InitOptions {
                provider,
                api_url,
                model,
                api_key,
                verify: !no_verify,
                force,
            };
            commands::init(&paths, options).await
        }
        Some(Commands::Config { key, value }) => commands::config(&paths, key.as_deref(), value.as_deref()),
        Some(Commands::Regen) => commands::regen(&paths),
        Some(Commands::Showsystem) => commands::show_system(&paths),
        None => run_session(cli, &paths).await,
    }
}

/// Logs go to a daily file under the config directory so they never mix
/// with console output.  `RUST_LOG` wins over `telemetry.log_level`.
fn init_logging(paths: &ConfigPaths) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = paths
        .load_config()
        .map(|c| c.telemetry.log_level)
        .unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let log_dir = paths.logs_dir();
    if std::fs::create_dir_all(&log_dir).is_err() {
        return None;
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "aish.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .init();
    Some(guard)
}

async fn run_session(cli: Cli, paths: &ConfigPaths) -> Result<()> {
    if !paths.is_initialized() {
        bail!("configuration not found in {}; run `aish init` first", paths.dir().display());
    }
    let prompt = cli.prompt.join(" ");
    if !cli.interactive && prompt.trim().is_empty() {
        bail!("usage: aish [--accept-all] <prompt>   or   aish -i");
    }

    let config = paths.load_effective_config()?;
    let api_key = paths.load_api_key()?;
    let policy = ExecutionPolicy::from_config(&config, paths.dir()).context("invalid security configuration")?;
    let client = ChatClient::new(&config.llm, api_key)?;
    let proposer = LlmProposer::new(Arc::new(client), paths.load_system_prompt()?);
    let cwd = std::env::current_dir().context("cannot determine the working directory")?;
    info!(cwd = %cwd.display(), interactive = cli.interactive, accept_all = cli.accept_all, "session starting");

    let (approval_tx, approval_rx) = approval_channel();
    let (event_tx, event_rx) = event_channel();
    let interrupt = Interrupt::new();
    let _ctrl_c = interrupt.spawn_ctrl_c_listener();
    let lines = console::spawn_stdin_reader();
    let console_task = tokio::spawn(console::run(event_rx, approval_rx, lines.clone()));

    let mut session = Session::new(
        SessionOptions::from_config(&config, cwd, cli.accept_all),
        Arc::new(policy),
        Arc::new(proposer),
        approval_tx,
        event_tx,
        interrupt,
    );

    let outcome = if cli.interactive {
        console::banner();
        let first = if prompt.trim().is_empty() {
            Ok(())
        } else {
            report(session.run_turn(&prompt).await.map(|_| ()))
        };
        match first {
            Ok(()) => {
                let mut source = console::StdinPrompts::new(lines);
                session.run_interactive(&mut source).await
            }
            Err(e) => Err(e),
        }
    } else {
        session.run_once(&prompt).await.map(|_| ())
    };

    if let Some(path) = &cli.transcript {
        write_transcript(&session, path);
    }
    drop(session);
    let _ = console_task.await;
    outcome.map_err(anyhow::Error::from)
}

/// Model failures are shown and the interactive loop carries on.
fn report(result: Result<(), SessionError>) -> Result<(), SessionError> {
    match result {
        Err(SessionError::Proposer(message)) => {
            console::error(&message);
            Ok(())
        }
        other => other,
    }
}

fn write_transcript(session: &Session, path: &Path) {
    match session.export_history(path) {
        Ok(()) => console::note(&format!("transcript written to {}", path.display())),
        Err(e) => console::error(&format!("failed to write transcript: {e:#}")),
    }
}
