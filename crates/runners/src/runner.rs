//! The runner abstraction: executes one command against the coding
//! assistant, either by injecting it into a live session or by spawning a
//! resumable process.

use std::path::PathBuf;

use cr_domain::error::Result;

/// Key used when the caller supplies none.
pub const DEFAULT_SESSION_KEY: &str = "default";

/// Per-call context supplied by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Selects which continuation to resume.  Empty means
    /// [`DEFAULT_SESSION_KEY`].
    pub session_key: String,
    /// Working directory for the process; the runner's default when `None`.
    pub workdir: Option<PathBuf>,
    /// Per-call override of the sandbox policy.
    pub sandbox: Option<String>,
    /// Target of the inject runner.
    pub tmux_session: Option<String>,
}

impl RunContext {
    pub fn for_key(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            ..Self::default()
        }
    }

    pub fn key(&self) -> &str {
        if self.session_key.trim().is_empty() {
            DEFAULT_SESSION_KEY
        } else {
            &self.session_key
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutput {
    pub final_text: String,
    /// Continuation id in effect after the call, if any.
    pub continuation_id: Option<String>,
    /// Raw stdout of the process.
    pub logs: String,
    /// The command was handed off and its answer will arrive elsewhere.
    pub queued: bool,
}

impl RunOutput {
    pub fn queued() -> Self {
        Self {
            queued: true,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
pub trait Runner: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports_resume(&self) -> bool {
        false
    }

    async fn run(&self, prompt: &str, ctx: &RunContext) -> Result<RunOutput>;

    /// Continue the conversation held for `ctx.session_key`.
    async fn resume(&self, prompt: &str, ctx: &RunContext) -> Result<RunOutput> {
        self.run(prompt, ctx).await
    }

    /// Whether a continuation is currently held for `session_key`.
    async fn has_session(&self, _session_key: &str) -> bool {
        false
    }

    /// Forget one continuation (`Some(key)`) or all of them (`None`).
    /// Returns whether anything was removed.
    async fn clear_sessions(&self, _session_key: Option<&str>) -> Result<bool> {
        Ok(false)
    }
}
