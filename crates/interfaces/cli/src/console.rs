//! Terminal presentation: renders session events, asks approval questions
//! and supplies interactive prompts.  All stdin reading goes through one
//! background thread so approvals and prompts never race for input.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use aish_core::{ExecStatus, OperationKind};
use aish_exec::{ApprovalReceiver, ApprovalRequest, StreamKind, UserResponse};
use aish_runtime::{EventReceiver, PromptSource, SessionEvent};

/// Lines typed on stdin, shared by the approval prompt and the prompt loop.
#[derive(Clone)]
pub(crate) struct Lines(Arc<Mutex<mpsc::Receiver<String>>>);

impl Lines {
    async fn next_line(&self) -> Option<String> {
        self.0.lock().await.recv().await
    }

    /// Throw away lines typed before the current question was shown.
    async fn discard_pending(&self) -> usize {
        let mut rx = self.0.lock().await;
        let mut discarded = 0;
        while rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

pub(crate) fn spawn_stdin_reader() -> Lines {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "stdin closed");
                    break;
                }
            }
        }
    });
    Lines(Arc::new(Mutex::new(rx)))
}

pub(crate) struct StdinPrompts {
    lines: Lines,
}

impl StdinPrompts {
    pub(crate) fn new(lines: Lines) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl PromptSource for StdinPrompts {
    async fn next_prompt(&mut self) -> Option<String> {
        // Let the console task print the tail of the previous turn first.
        tokio::task::yield_now().await;
        print!("aish> ");
        let _ = io::stdout().flush();
        self.lines.next_line().await
    }
}

/// Console loop: runs until the session drops both channel senders.
pub(crate) async fn run(mut events: EventReceiver, mut approvals: ApprovalReceiver, lines: Lines) {
    loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => render(event),
            Some((request, mut reply)) = approvals.recv() => {
                while let Ok(event) = events.try_recv() {
                    render(event);
                }
                ask(&request);
                let stale = lines.discard_pending().await;
                if stale > 0 {
                    debug!(stale, "ignored input typed before the approval prompt");
                }
                let answer = tokio::select! {
                    line = lines.next_line() => line,
                    () = reply.closed() => {
                        println!();
                        note("approval cancelled");
                        continue;
                    }
                };
                let response = match answer {
                    Some(line) => parse_answer(&line),
                    None => {
                        // stdin closed: dropping the reply aborts the session.
                        note("no input available; aborting");
                        continue;
                    }
                };
                let _ = reply.send(response);
            }
            else => break,
        }
    }
}

fn ask(request: &ApprovalRequest) {
    println!("? {}", request.summary);
    print!("  Approve? [y/N] ");
    let _ = io::stdout().flush();
}

fn parse_answer(line: &str) -> UserResponse {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => UserResponse::Approve,
        _ => UserResponse::Deny,
    }
}

fn render(event: SessionEvent) {
    match event {
        SessionEvent::Thinking { round, .. } => {
            if round == 0 {
                println!("… thinking");
            }
        }
        SessionEvent::Reply(text) => println!("\n{text}\n"),
        SessionEvent::Denied { action, reason } => {
            println!("✗ {}\n  denied: {reason}", action.describe());
        }
        SessionEvent::AutoApproved { action, pattern } => {
            println!("✓ {} (auto-approved by {pattern})", action.describe());
        }
        SessionEvent::Declined { action, decision } => {
            println!("✗ {}: {decision}", action.describe());
        }
        SessionEvent::Executing(action) => println!("→ {}", action.describe()),
        SessionEvent::Output { stream, text } => match stream {
            StreamKind::Stdout => {
                print!("{text}");
                let _ = io::stdout().flush();
            }
            StreamKind::Stderr => {
                eprint!("{text}");
            }
        },
        SessionEvent::Finished { action, result } => {
            match &result.status {
                // Shell output was already streamed.
                ExecStatus::Success if action.is_shell() => {}
                ExecStatus::Success => match action.operation() {
                    Some(OperationKind::FsReadFile | OperationKind::FsListDir) => {
                        if !result.output.is_empty() {
                            println!("{}", result.output.trim_end());
                        }
                    }
                    _ => note(&result.output),
                },
                ExecStatus::Failure(err) => println!("✗ {err}"),
            }
            if result.truncated {
                note("captured output was truncated");
            }
        }
        SessionEvent::ProposerFailed(message) => error(&message),
    }
}

pub(crate) fn banner() {
    println!("aish interactive mode. Type 'quit' or 'exit' to leave; Ctrl+C interrupts.");
}

pub(crate) fn note(message: &str) {
    println!("  {message}");
}

pub(crate) fn error(message: &str) {
    eprintln!("error: {message}");
}
