//! Shell command execution with live output and interrupt support.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use aish_core::{EngineError, ExecStatus, ExecutionError, ExecutionResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::{OutputSink, StreamKind, truncate_byte_boundary};
use crate::interrupt::Armed;

/// Longest single chunk forwarded to the sink; longer lines are split.
const MAX_CHUNK_BYTES: u64 = 8192;
/// How long to keep collecting output after the process group was killed.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type Chunk = (StreamKind, Vec<u8>);

/// Captured text for one stream, capped at `limit` bytes.
struct Capture {
    text: String,
    limit: usize,
    truncated: bool,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &str) {
        if self.truncated {
            return;
        }
        let room = self.limit.saturating_sub(self.text.len());
        if chunk.len() <= room {
            self.text.push_str(chunk);
        } else {
            let end = truncate_byte_boundary(chunk, room);
            self.text.push_str(&chunk[..end]);
            self.truncated = true;
        }
    }
}

struct Captured {
    stdout: Capture,
    stderr: Capture,
}

impl Captured {
    fn forward(&mut self, (stream, bytes): Chunk, sink: &mut dyn OutputSink) {
        let text = String::from_utf8_lossy(&bytes);
        sink.chunk(stream, &text);
        match stream {
            StreamKind::Stdout => self.stdout.push(&text),
            StreamKind::Stderr => self.stderr.push(&text),
        }
    }

    fn into_result(self, status: ExecStatus, exit_code: Option<i32>, started: Instant) -> ExecutionResult {
        ExecutionResult {
            status,
            truncated: self.stdout.truncated || self.stderr.truncated,
            output: self.stdout.text,
            stderr: self.stderr.text,
            exit_code,
            duration: started.elapsed(),
        }
    }
}

/// Run `command` through the platform shell in `cwd`.
///
/// Each stream is captured up to `max_output_bytes`; the sink always sees
/// everything.  Interrupting kills the whole process group and returns the
/// output gathered so far.
pub(super) async fn run(
    command: &str,
    cwd: &Path,
    max_output_bytes: usize,
    sink: &mut dyn OutputSink,
    mut armed: Armed,
) -> Result<ExecutionResult, EngineError> {
    let started = Instant::now();

    let mut cmd = shell_command(command);
    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if is_resource_exhaustion(&e) => {
            error!(error = %e, "cannot create a process");
            return Err(EngineError::ResourceExhausted(e.to_string()));
        }
        Err(e) => {
            warn!(error = %e, cwd = %cwd.display(), "failed to spawn shell");
            return Ok(ExecutionResult::failure(
                ExecutionError::SpawnFailed(e.to_string()),
                started.elapsed(),
            ));
        }
    };

    let (tx, mut rx) = mpsc::channel::<Chunk>(64);
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, StreamKind::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, StreamKind::Stderr, tx.clone());
    }
    drop(tx);

    let mut captured = Captured {
        stdout: Capture::new(max_output_bytes),
        stderr: Capture::new(max_output_bytes),
    };

    let waited = {
        let pumping = pump(&mut rx, &mut captured, &mut *sink, &mut child);
        tokio::select! {
            status = pumping => Some(status),
            () = armed.triggered() => None,
        }
    };

    let Some(waited) = waited else {
        debug!(command, "interrupt received; killing process group");
        kill_tree(&mut child).await;
        let draining = async {
            while let Some(chunk) = rx.recv().await {
                captured.forward(chunk, &mut *sink);
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, draining).await.is_err() {
            debug!("output pipes still open after kill; giving up on the rest");
        }
        return Ok(captured.into_result(
            ExecStatus::Failure(ExecutionError::Interrupted),
            None,
            started,
        ));
    };

    let result = match waited {
        Ok(status) => {
            let code = exit_code(status);
            let status = if code == 0 {
                ExecStatus::Success
            } else {
                ExecStatus::Failure(ExecutionError::NonZeroExit(code))
            };
            captured.into_result(status, Some(code), started)
        }
        Err(e) => {
            warn!(error = %e, "failed waiting for shell");
            captured.into_result(
                ExecStatus::Failure(ExecutionError::Io {
                    path: cwd.display().to_string(),
                    message: e.to_string(),
                }),
                None,
                started,
            )
        }
    };
    Ok(result)
}

fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

fn spawn_reader<R>(pipe: R, stream: StreamKind, tx: mpsc::Sender<Chunk>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut pending = Vec::new();
        loop {
            let mut buf = std::mem::take(&mut pending);
            match (&mut reader).take(MAX_CHUNK_BYTES).read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    if !buf.is_empty() {
                        let _ = tx.send((stream, buf)).await;
                    }
                    break;
                }
                Ok(_) => {
                    pending = split_incomplete_tail(&mut buf);
                    if !buf.is_empty() && tx.send((stream, buf)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(?stream, error = %e, "output pipe read failed");
                    break;
                }
            }
        }
    });
}

/// Splits off a UTF-8 sequence cut short at the end of `buf` so the next
/// read can complete it.  Invalid bytes elsewhere stay in place.
fn split_incomplete_tail(buf: &mut Vec<u8>) -> Vec<u8> {
    let mut offset = 0;
    loop {
        match std::str::from_utf8(&buf[offset..]) {
            Ok(_) => return Vec::new(),
            Err(e) => match e.error_len() {
                Some(bad) => offset += e.valid_up_to() + bad,
                None => return buf.split_off(offset + e.valid_up_to()),
            },
        }
    }
}

/// Forward output until both pipes close, then reap the child.
async fn pump(
    rx: &mut mpsc::Receiver<Chunk>,
    captured: &mut Captured,
    sink: &mut dyn OutputSink,
    child: &mut Child,
) -> io::Result<ExitStatus> {
    while let Some(chunk) = rx.recv().await {
        captured.forward(chunk, sink);
    }
    child.wait().await
}

async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: kill(2) takes no pointers; a negative pid addresses the
            // process group created with process_group(0) at spawn.
            let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
            if rc != 0 {
                debug!(pid, error = %io::Error::last_os_error(), "killpg failed");
            }
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "child already gone");
    }
}

/// Signal deaths have no exit code and are reported as -1.
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn is_resource_exhaustion(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(libc::EAGAIN | libc::ENOMEM | libc::EMFILE | libc::ENFILE)
        )
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}
