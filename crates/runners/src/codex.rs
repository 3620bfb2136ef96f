//! Resumable runner backed by `codex exec`.
//!
//! Every call spawns a fresh process in the session's working directory.
//! The tool prints JSON events on stdout, one of which carries the thread
//! id; it is stored per session key so the next call can pass
//! `resume <id>` and continue the same conversation.  The final answer is
//! read from a per-call `--output-last-message` file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cr_domain::config::CodexConfig;
use cr_domain::error::{Error, Result};
use cr_domain::trace::TraceEvent;

use crate::process::{Invocation, InvocationState, ProcessSpawner, SpawnSpec, TokioSpawner};
use crate::runner::{RunContext, RunOutput, Runner};
use crate::session_map::RunnerSessionMap;

pub const RESUME_FALLBACK_NOTE: &str =
    "No previous Codex session found for this chat. Starting a new task instead.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Run,
    Resume,
}

pub struct CodexRunner {
    bin: String,
    extra_args: Vec<String>,
    sandbox: String,
    full_auto: bool,
    skip_git_check: bool,
    workdir: PathBuf,
    keep_output_files: bool,
    verbose: bool,
    capture_dir: PathBuf,
    sessions: RunnerSessionMap,
    spawner: Arc<dyn ProcessSpawner>,
}

impl CodexRunner {
    pub fn new(config: &CodexConfig, session_map_path: impl Into<PathBuf>) -> Self {
        let workdir = config.workdir.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        });
        Self {
            bin: config.bin.clone(),
            extra_args: config.args.clone(),
            sandbox: config.sandbox.clone(),
            full_auto: config.full_auto,
            skip_git_check: config.skip_git_check,
            workdir,
            keep_output_files: config.keep_output_files,
            verbose: config.verbose,
            capture_dir: std::env::temp_dir(),
            sessions: RunnerSessionMap::new(session_map_path),
            spawner: Arc::new(TokioSpawner),
        }
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Directory for the per-call output-capture files (default: the system
    /// temp dir).
    pub fn with_capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = dir.into();
        self
    }

    pub fn session_map(&self) -> &RunnerSessionMap {
        &self.sessions
    }

    fn capture_path(&self) -> PathBuf {
        let stamp = chrono::Utc::now().timestamp_millis();
        let nonce = uuid::Uuid::new_v4().simple();
        self.capture_dir
            .join(format!("codex-last-{stamp}-{nonce}.txt"))
    }

    fn build_args(
        &self,
        prompt: &str,
        continuation: Option<&str>,
        capture: &Path,
        sandbox: &str,
    ) -> Vec<String> {
        let mut args = vec![
            "exec".to_owned(),
            "--json".to_owned(),
            "--output-last-message".to_owned(),
            capture.display().to_string(),
            "--sandbox".to_owned(),
            sandbox.to_owned(),
        ];
        if self.full_auto {
            args.push("--full-auto".into());
        }
        if self.skip_git_check {
            args.push("--skip-git-repo-check".into());
        }
        args.extend(self.extra_args.iter().cloned());
        if let Some(id) = continuation {
            args.push("resume".into());
            args.push(id.to_owned());
        }
        args.push(prompt.to_owned());
        args
    }

    async fn execute(&self, mode: Mode, prompt: &str, ctx: &RunContext) -> Result<RunOutput> {
        let key = ctx.key();
        let mut note = None;
        let previous = match mode {
            Mode::Resume => {
                let found = self.sessions.get(key).await;
                if found.is_none() {
                    TraceEvent::ResumeFallback {
                        session_key: key.to_owned(),
                    }
                    .emit();
                    note = Some(RESUME_FALLBACK_NOTE);
                }
                found
            }
            Mode::Run => None,
        };

        let workdir = ctx.workdir.clone().unwrap_or_else(|| self.workdir.clone());
        if !tokio::fs::metadata(&workdir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(Error::Configuration(format!(
                "working directory does not exist: {}",
                workdir.display()
            )));
        }

        let capture = self.capture_path();
        let sandbox = ctx.sandbox.as_deref().unwrap_or(&self.sandbox);
        let spec = SpawnSpec {
            program: self.bin.clone(),
            args: self.build_args(prompt, previous.as_deref(), &capture, sandbox),
            workdir,
        };
        if self.verbose {
            tracing::debug!(command = %spec.command_line(), "codex command");
        }
        TraceEvent::RunnerInvoked {
            runner: self.name().to_owned(),
            session_key: key.to_owned(),
            resumed: previous.is_some(),
            workdir: spec.workdir.display().to_string(),
        }
        .emit();

        let handle = self.spawner.spawn(&spec).map_err(|e| self.spawn_error(e))?;
        let mut invocation = Invocation::spawned();
        let streamed = invocation.stream(handle).await;
        let captured = self.take_capture(&capture).await;
        streamed.map_err(|e| Error::ExternalProcess(format!("Codex stream failed: {e}")))?;

        let final_text = match invocation.resolve(captured.as_deref()) {
            InvocationState::Resolved { final_text } => final_text.clone(),
            InvocationState::Rejected { message } => {
                tracing::warn!(session_key = key, error = %message, "codex invocation failed");
                return Err(Error::ExternalProcess(message.clone()));
            }
            other => {
                return Err(Error::Other(format!("codex invocation ended in state {other:?}")))
            }
        };

        let captured_id = invocation.capture().continuation_id().map(str::to_owned);
        if let Some(id) = &captured_id {
            self.sessions.set(key, id).await?;
            TraceEvent::ContinuationCaptured {
                session_key: key.to_owned(),
                continuation_id: id.clone(),
            }
            .emit();
        }

        Ok(RunOutput {
            final_text: match note {
                Some(note) => format!("{note}\n\n{final_text}"),
                None => final_text,
            },
            continuation_id: captured_id.or(previous),
            logs: invocation.capture().stdout().to_owned(),
            queued: false,
        })
    }

    fn spawn_error(&self, e: std::io::Error) -> Error {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ExternalProcess(format!(
                "Codex CLI not found. Set CODEX_BIN or install codex CLI. ({})",
                self.bin
            ))
        } else {
            Error::ExternalProcess(format!("failed to spawn {}: {e}", self.bin))
        }
    }

    /// Read the output-capture file and delete it unless configured to keep
    /// it.
    async fn take_capture(&self, path: &Path) -> Option<String> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read codex output file");
                None
            }
        };
        if !self.keep_output_files {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::debug!(path = %path.display(), error = %e, "could not remove codex output file");
            }
        }
        text
    }
}

#[async_trait::async_trait]
impl Runner for CodexRunner {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn supports_resume(&self) -> bool {
        true
    }

    async fn run(&self, prompt: &str, ctx: &RunContext) -> Result<RunOutput> {
        self.execute(Mode::Run, prompt, ctx).await
    }

    /// Falls back to a fresh run, with an explanatory note prepended, when
    /// no continuation is held for the key.
    async fn resume(&self, prompt: &str, ctx: &RunContext) -> Result<RunOutput> {
        self.execute(Mode::Resume, prompt, ctx).await
    }

    async fn has_session(&self, session_key: &str) -> bool {
        self.sessions.has(session_key).await
    }

    async fn clear_sessions(&self, session_key: Option<&str>) -> Result<bool> {
        match session_key {
            Some(key) => self.sessions.clear(key).await,
            None => self.sessions.clear_all().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(config: CodexConfig) -> CodexRunner {
        CodexRunner::new(&config, "/nonexistent/map.json")
    }

    #[test]
    fn fresh_args_layout() {
        let r = runner(CodexConfig::default());
        let args = r.build_args("fix it", None, Path::new("/tmp/out.txt"), "read-only");
        assert_eq!(
            args,
            vec![
                "exec",
                "--json",
                "--output-last-message",
                "/tmp/out.txt",
                "--sandbox",
                "read-only",
                "fix it"
            ]
        );
    }

    #[test]
    fn resume_args_with_flags_and_passthrough() {
        let r = runner(CodexConfig {
            full_auto: true,
            skip_git_check: true,
            args: vec!["--model".into(), "o3".into()],
            ..CodexConfig::default()
        });
        let args = r.build_args("go on", Some("t-9"), Path::new("/tmp/o"), "workspace-write");
        assert_eq!(
            args[4..],
            [
                "--sandbox",
                "workspace-write",
                "--full-auto",
                "--skip-git-repo-check",
                "--model",
                "o3",
                "resume",
                "t-9",
                "go on"
            ]
        );
    }

    #[test]
    fn capture_paths_are_unique() {
        let r = runner(CodexConfig::default()).with_capture_dir("/tmp/caps");
        let a = r.capture_path();
        let b = r.capture_path();
        assert_ne!(a, b);
        assert!(a.starts_with("/tmp/caps"));
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("codex-last-") && name.ends_with(".txt"));
    }
}
