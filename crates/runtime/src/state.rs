//! In-memory session record and its JSON Lines transcript export.
//!
//! Nothing here is persisted implicitly; the transcript is only written when
//! the caller asks for it.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use aish_core::HistoryEntry;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user prompt and the reply that closed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: usize,
    pub prompt: String,
    /// Final natural-language reply, if the model gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Everything that happened in one session, in order.
#[derive(Debug, Clone)]
pub struct SessionState {
    entries: Vec<HistoryEntry>,
    turns: Vec<TurnRecord>,
    cwd: PathBuf,
    accept_all: bool,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TranscriptLine<'a> {
    Turn(&'a TurnRecord),
    Action(&'a HistoryEntry),
}

impl SessionState {
    pub fn new(cwd: impl Into<PathBuf>, accept_all: bool) -> Self {
        Self {
            entries: Vec::new(),
            turns: Vec::new(),
            cwd: cwd.into(),
            accept_all,
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn turns(&self) -> &[TurnRecord] {
        &self.turns
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn accept_all(&self) -> bool {
        self.accept_all
    }

    /// Entries recorded for one turn, in order.
    pub fn entries_for_turn(&self, turn: usize) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().filter(move |e| e.turn() == turn)
    }

    pub(crate) fn begin_turn(&mut self, prompt: &str) -> usize {
        let turn = self.turns.len();
        self.turns.push(TurnRecord {
            turn,
            prompt: prompt.to_string(),
            reply: None,
            started_at: Utc::now(),
        });
        turn
    }

    pub(crate) fn finish_turn(&mut self, reply: Option<String>) {
        if let Some(current) = self.turns.last_mut() {
            current.reply = reply;
        }
    }

    pub(crate) fn record(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// Write every turn followed by its action entries, one JSON object per
    /// line.  Creates parent directories and replaces an existing file.
    pub fn export_jsonl(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create transcript directory {}", parent.display()))?;
        }
        let file = fs::File::create(path)
            .with_context(|| format!("create transcript file {}", path.display()))?;
        let mut out = BufWriter::new(file);

        for turn in &self.turns {
            write_line(&mut out, &TranscriptLine::Turn(turn))?;
            for entry in self.entries_for_turn(turn.turn) {
                write_line(&mut out, &TranscriptLine::Action(entry))?;
            }
        }
        out.flush()
            .with_context(|| format!("flush transcript {}", path.display()))?;
        Ok(())
    }
}

fn write_line(out: &mut impl Write, line: &TranscriptLine<'_>) -> Result<()> {
    let json = serde_json::to_string(line).context("serialize transcript line")?;
    writeln!(out, "{json}")?;
    Ok(())
}
