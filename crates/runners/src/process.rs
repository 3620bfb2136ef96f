//! Process spawning and the per-invocation state machine.
//!
//! An invocation moves `Spawned → Streaming → Exited → Resolved | Rejected`.
//! Streaming feeds stdout through a [`StreamCapture`] that picks up the
//! continuation id; resolution is a pure function of the exit code, the
//! captured streams and the output-capture file, so each branch can be
//! tested without a real process.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;

/// JSON fields that carry the continuation id in the tool's event stream.
pub const CONTINUATION_FIELDS: [&str; 4] = ["session_id", "sessionId", "thread_id", "threadId"];

/// Returned when neither the capture file nor stdout has any text.
pub const NO_RESPONSE_SENTINEL: &str = "No response captured from Codex.";

/// How much of stdout is kept when it stands in for a missing answer.
pub const STDOUT_TAIL_CHARS: usize = 4000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Spawner capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

impl SpawnSpec {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Value following `flag` in the argument list.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

pub type OutputStream = Pin<Box<dyn AsyncRead + Send>>;
/// Resolves to the exit code, `None` when the process died from a signal.
pub type ExitFuture = Pin<Box<dyn Future<Output = std::io::Result<Option<i32>>> + Send>>;

pub struct ProcessHandle {
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub exit: ExitFuture,
}

pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, spec: &SpawnSpec) -> std::io::Result<ProcessHandle>;
}

/// Spawns real child processes with piped stdout/stderr and no stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, spec: &SpawnSpec) -> std::io::Result<ProcessHandle> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.workdir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("child stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("child stderr was not piped"))?;

        Ok(ProcessHandle {
            stdout: Box::pin(stdout),
            stderr: Box::pin(stderr),
            exit: Box::pin(async move { child.wait().await.map(|status| status.code()) }),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream capture
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulates stdout and tracks the latest continuation id seen in it.
#[derive(Debug, Clone, Default)]
pub struct StreamCapture {
    stdout: String,
    continuation_id: Option<String>,
}

impl StreamCapture {
    pub fn push_line(&mut self, line: &str) {
        self.stdout.push_str(line);
        self.stdout.push('\n');
        if let Some(id) = continuation_id_in(line) {
            self.continuation_id = Some(id);
        }
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn continuation_id(&self) -> Option<&str> {
        self.continuation_id.as_deref()
    }
}

/// Continuation id carried by one stdout line, if it is a JSON object with
/// one of the recognised fields.
pub fn continuation_id_in(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let event: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    CONTINUATION_FIELDS.iter().find_map(|field| {
        event
            .get(*field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub enum InvocationState {
    Spawned,
    Streaming,
    Exited { code: Option<i32> },
    Resolved { final_text: String },
    Rejected { message: String },
}

impl InvocationState {
    fn label(&self) -> &'static str {
        match self {
            Self::Spawned => "spawned",
            Self::Streaming => "streaming",
            Self::Exited { .. } => "exited",
            Self::Resolved { .. } => "resolved",
            Self::Rejected { .. } => "rejected",
        }
    }
}

pub struct Invocation {
    state: InvocationState,
    capture: StreamCapture,
    stderr: String,
}

impl Invocation {
    /// Start tracking a freshly spawned process.
    pub fn spawned() -> Self {
        Self {
            state: InvocationState::Spawned,
            capture: StreamCapture::default(),
            stderr: String::new(),
        }
    }

    pub fn state(&self) -> &InvocationState {
        &self.state
    }

    pub fn capture(&self) -> &StreamCapture {
        &self.capture
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    fn transition(&mut self, next: InvocationState) {
        tracing::trace!(from = self.state.label(), to = next.label(), "invocation state");
        self.state = next;
    }

    /// Drain both streams to EOF, then wait for the exit code.
    pub async fn stream(&mut self, handle: ProcessHandle) -> std::io::Result<Option<i32>> {
        self.transition(InvocationState::Streaming);
        let ProcessHandle {
            stdout,
            mut stderr,
            exit,
        } = handle;

        let capture = &mut self.capture;
        let stdout_task = async move {
            let mut segments = BufReader::new(stdout).split(b'\n');
            while let Some(segment) = segments.next_segment().await? {
                let line = String::from_utf8_lossy(&segment);
                capture.push_line(line.trim_end_matches('\r'));
            }
            Ok::<_, std::io::Error>(())
        };
        let stderr_task = async move {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await?;
            Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf).into_owned())
        };

        let (stdout_res, stderr_res) = tokio::join!(stdout_task, stderr_task);
        stdout_res?;
        self.stderr = stderr_res?;

        let code = exit.await?;
        self.transition(InvocationState::Exited { code });
        Ok(code)
    }

    /// Settle the exited invocation given the contents of the output-capture
    /// file.
    pub fn resolve(&mut self, captured: Option<&str>) -> &InvocationState {
        if let InvocationState::Exited { code } = self.state {
            let next = resolve_exit(code, self.capture.stdout(), &self.stderr, captured);
            self.transition(next);
        }
        &self.state
    }
}

/// Outcome of an exited process.
///
/// Exit 0 resolves with the capture file text, else the stdout tail, else
/// [`NO_RESPONSE_SENTINEL`].  Any other exit rejects with stderr, else the
/// stdout tail, else a generic exit-code message.
pub fn resolve_exit(
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
    captured: Option<&str>,
) -> InvocationState {
    let stdout_tail = tail_chars(stdout.trim(), STDOUT_TAIL_CHARS);
    if code == Some(0) {
        let final_text = captured
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| Some(stdout_tail).filter(|s| !s.is_empty()))
            .unwrap_or(NO_RESPONSE_SENTINEL)
            .to_owned();
        return InvocationState::Resolved { final_text };
    }

    let message = match (stderr.trim(), stdout_tail) {
        (err, _) if !err.is_empty() => err.to_owned(),
        (_, out) if !out.is_empty() => out.to_owned(),
        _ => match code {
            Some(c) => format!("Codex exited with code {c}"),
            None => "Codex was terminated by a signal".to_owned(),
        },
    };
    InvocationState::Rejected { message }
}

fn tail_chars(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    match s.char_indices().nth(count - max) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(stdout: &str, stderr: &str, code: Option<i32>) -> ProcessHandle {
        ProcessHandle {
            stdout: Box::pin(std::io::Cursor::new(stdout.as_bytes().to_vec())),
            stderr: Box::pin(std::io::Cursor::new(stderr.as_bytes().to_vec())),
            exit: Box::pin(async move { Ok(code) }),
        }
    }

    #[test]
    fn continuation_id_fields() {
        assert_eq!(
            continuation_id_in(r#"{"type":"thread.started","thread_id":"t-1"}"#).as_deref(),
            Some("t-1")
        );
        assert_eq!(
            continuation_id_in(r#"  {"sessionId":"s-2"}  "#).as_deref(),
            Some("s-2")
        );
        assert_eq!(continuation_id_in(r#"{"session_id":""}"#), None);
        assert_eq!(continuation_id_in(r#"{"msg":"hello"}"#), None);
        assert_eq!(continuation_id_in("session_id: x"), None);
        assert_eq!(continuation_id_in("{broken"), None);
    }

    #[test]
    fn capture_keeps_last_id() {
        let mut capture = StreamCapture::default();
        capture.push_line(r#"{"session_id":"a"}"#);
        capture.push_line("plain progress line");
        capture.push_line(r#"{"thread_id":"b"}"#);
        capture.push_line(r#"{"type":"turn.completed"}"#);
        assert_eq!(capture.continuation_id(), Some("b"));
        assert_eq!(capture.stdout().lines().count(), 4);
    }

    #[tokio::test]
    async fn invocation_walks_states() {
        let mut inv = Invocation::spawned();
        assert_eq!(inv.state(), &InvocationState::Spawned);

        let code = inv
            .stream(handle("{\"thread_id\":\"t\"}\r\nworking\n", "warn\n", Some(0)))
            .await
            .unwrap();
        assert_eq!(code, Some(0));
        assert_eq!(inv.state(), &InvocationState::Exited { code: Some(0) });
        assert_eq!(inv.capture().continuation_id(), Some("t"));
        assert_eq!(inv.stderr(), "warn\n");

        let state = inv.resolve(Some("  answer \n")).clone();
        assert_eq!(
            state,
            InvocationState::Resolved {
                final_text: "answer".into()
            }
        );
    }

    #[test]
    fn resolve_success_fallbacks() {
        assert_eq!(
            resolve_exit(Some(0), "stdout text\n", "", Some("   ")),
            InvocationState::Resolved {
                final_text: "stdout text".into()
            }
        );
        assert_eq!(
            resolve_exit(Some(0), "", "noise", None),
            InvocationState::Resolved {
                final_text: NO_RESPONSE_SENTINEL.into()
            }
        );
    }

    #[test]
    fn resolve_failure_messages() {
        assert_eq!(
            resolve_exit(Some(1), "", "boom\n", None),
            InvocationState::Rejected {
                message: "boom".into()
            }
        );
        assert_eq!(
            resolve_exit(Some(2), "partial\n", "  ", Some("ignored")),
            InvocationState::Rejected {
                message: "partial".into()
            }
        );
        assert_eq!(
            resolve_exit(Some(3), "", "", None),
            InvocationState::Rejected {
                message: "Codex exited with code 3".into()
            }
        );
        assert!(matches!(
            resolve_exit(None, "", "", None),
            InvocationState::Rejected { .. }
        ));
    }

    #[test]
    fn tail_keeps_end_of_long_output() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("abc", 10), "abc");
        assert_eq!(tail_chars("ééé", 2), "éé");
    }
}
