//! The `init`, `config`, `regen` and `showsystem` subcommands.

use std::io::{self, Write};

use anyhow::{Context, Result, bail};

use aish_config::{AppConfig, ConfigPaths};
use aish_core::OperationKind;
use aish_llm::ChatClient;

use crate::ProviderPreset;

pub(crate) struct InitOptions {
    pub provider: ProviderPreset,
    pub api_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub verify: bool,
    pub force: bool,
}

/// Provider name, API base URL and model for each preset.
fn preset(provider: ProviderPreset) -> (&'static str, &'static str, &'static str) {
    match provider {
        ProviderPreset::Openai => ("OpenAI", "https://api.openai.com/v1", "gpt-4"),
        ProviderPreset::Openrouter => ("OpenRouter", "https://openrouter.ai/api/v1", "openai/gpt-4"),
        ProviderPreset::Custom => ("Custom", "", ""),
    }
}

fn build_init_config(options: &InitOptions) -> Result<AppConfig> {
    let (provider, default_url, default_model) = preset(options.provider);
    let mut config = AppConfig::default();
    config.llm.provider = provider.to_string();
    config.llm.api_url = options
        .api_url
        .clone()
        .unwrap_or_else(|| default_url.to_string());
    config.llm.model = options
        .model
        .clone()
        .unwrap_or_else(|| default_model.to_string());

    if config.llm.api_url.trim().is_empty() {
        bail!("--api-url is required for a custom provider");
    }
    if config.llm.model.trim().is_empty() {
        bail!("--model is required for a custom provider");
    }
    Ok(config)
}

pub(crate) async fn init(paths: &ConfigPaths, options: InitOptions) -> Result<()> {
    if paths.is_initialized() && !options.force {
        bail!(
            "aish is already configured in {}; pass --force to replace it",
            paths.dir().display()
        );
    }
    let config = build_init_config(&options)?;

    let api_key = match options.api_key.clone() {
        Some(key) => key,
        None => read_line("API key: ")?,
    };
    let api_key = api_key.trim();
    if api_key.is_empty() {
        bail!("an API key is required");
    }

    if options.verify {
        print!("Testing API key... ");
        io::stdout().flush().ok();
        match ChatClient::new(&config.llm, api_key)?.test_api_key().await {
            Ok(()) => println!("ok"),
            Err(e) => {
                let first_line = e.to_string().lines().next().unwrap_or("invalid").to_string();
                println!("failed: {first_line}");
                println!("Saving anyway; fix it later with `aish init --force`.");
            }
        }
    }

    paths.initialize(&config, api_key, options.force)?;
    println!("✓ Configuration written to {}", paths.dir().display());
    println!("Try: aish list the files in this directory");
    Ok(())
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

pub(crate) fn config(paths: &ConfigPaths, key: Option<&str>, value: Option<&str>) -> Result<()> {
    let mut config = paths.load_config()?;
    match (key, value) {
        (Some(key), Some(value)) => {
            config.set_value(key, value)?;
            paths.save_config(&config)?;
            println!("✓ Set {key} = {}", config.get_value(key)?);
        }
        (Some(key), None) => println!("{key} = {}", config.get_value(key)?),
        (None, _) => print!("{}", render_config(&config)?),
    }
    Ok(())
}

/// Every configurable key with its current value, grouped by section.
fn render_config(config: &AppConfig) -> Result<String> {
    let mut keys: Vec<(&str, Vec<String>)> = vec![
        (
            "LLM",
            ["provider", "api_url", "model", "max_tokens", "request_timeout_secs"]
                .iter()
                .map(|k| format!("llm.{k}"))
                .collect(),
        ),
        (
            "Security",
            [
                "allow_absolute_paths",
                "allow_config_path_access",
                "blocked_extensions",
                "ignore_patterns",
                "max_read_bytes",
                "max_output_bytes",
            ]
            .iter()
            .map(|k| format!("security.{k}"))
            .collect(),
        ),
        (
            "Operation permissions",
            OperationKind::ALL
                .iter()
                .map(|kind| format!("security.allowed_operations.{}", kind.config_key()))
                .collect(),
        ),
    ];
    keys.push(("Session", vec!["session.max_rounds".to_string(), "telemetry.log_level".to_string()]));

    let mut out = String::new();
    for (section, section_keys) in keys {
        out.push_str(&format!("── {section} ──\n"));
        for key in section_keys {
            out.push_str(&format!("  {key} = {}\n", config.get_value(&key)?));
        }
    }
    out.push_str("── Whitelist ──\n");
    if config.whitelist.is_empty() {
        out.push_str("  (empty)\n");
    }
    for pattern in &config.whitelist {
        out.push_str(&format!("  {pattern}\n"));
    }
    Ok(out)
}

pub(crate) fn regen(paths: &ConfigPaths) -> Result<()> {
    let path = paths.write_default_system_prompt()?;
    println!("✓ System prompt regenerated at {}", path.display());
    Ok(())
}

pub(crate) fn show_system(paths: &ConfigPaths) -> Result<()> {
    let prompt = paths.load_system_prompt()?;
    println!("Path: {}", paths.system_prompt_file().display());
    println!("{}", "─".repeat(60));
    println!("{}", prompt.trim_end());
    println!("{}", "─".repeat(60));
    Ok(())
}
