//! Inject runner: types the prompt into an already-running interactive
//! session.  The answer arrives through the session's own notification
//! hooks, so every call returns immediately as queued.

use std::sync::Arc;

use tokio::process::Command;

use cr_domain::error::{Error, Result};

use crate::runner::{RunContext, RunOutput, Runner};

#[async_trait::async_trait]
pub trait CommandInjector: Send + Sync {
    async fn inject(&self, command: &str, session: &str) -> Result<()>;
}

/// Delivers commands with `tmux send-keys`.
#[derive(Debug, Clone)]
pub struct TmuxInjector {
    tmux_bin: String,
}

impl TmuxInjector {
    pub fn new(tmux_bin: impl Into<String>) -> Self {
        Self {
            tmux_bin: tmux_bin.into(),
        }
    }

    async fn tmux(&self, args: &[&str]) -> Result<()> {
        let output = Command::new(&self.tmux_bin)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::ExternalProcess(format!("tmux not found ({})", self.tmux_bin))
                }
                _ => Error::Io(e),
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        Err(Error::ExternalProcess(if stderr.is_empty() {
            format!("tmux exited with {}", output.status)
        } else {
            stderr
        }))
    }
}

#[async_trait::async_trait]
impl CommandInjector for TmuxInjector {
    async fn inject(&self, command: &str, session: &str) -> Result<()> {
        // Literal mode so the prompt is not parsed as key names.
        self.tmux(&["send-keys", "-t", session, "-l", command]).await?;
        self.tmux(&["send-keys", "-t", session, "Enter"]).await?;
        tracing::debug!(session, chars = command.len(), "command injected");
        Ok(())
    }
}

pub struct InjectRunner {
    injector: Arc<dyn CommandInjector>,
    default_session: Option<String>,
}

impl InjectRunner {
    pub fn new(injector: Arc<dyn CommandInjector>, default_session: Option<String>) -> Self {
        Self {
            injector,
            default_session: default_session.filter(|s| !s.trim().is_empty()),
        }
    }
}

#[async_trait::async_trait]
impl Runner for InjectRunner {
    fn name(&self) -> &'static str {
        "inject"
    }

    async fn run(&self, prompt: &str, ctx: &RunContext) -> Result<RunOutput> {
        let session = ctx
            .tmux_session
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.default_session.as_deref())
            .ok_or_else(|| {
                Error::Configuration("inject runner requires a tmux session name".into())
            })?;
        self.injector.inject(prompt, session).await?;
        Ok(RunOutput::queued())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl CommandInjector for Recorder {
        async fn inject(&self, command: &str, session: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((command.to_owned(), session.to_owned()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn queues_into_context_session() {
        let recorder = Arc::new(Recorder::default());
        let runner = InjectRunner::new(recorder.clone(), Some("main".into()));

        let ctx = RunContext {
            tmux_session: Some("work".into()),
            ..RunContext::for_key("ABCD1234")
        };
        let out = runner.run("ls", &ctx).await.unwrap();
        assert!(out.queued);
        assert!(out.final_text.is_empty());

        let out = runner.resume("pwd", &RunContext::default()).await.unwrap();
        assert!(out.queued);

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("ls".to_owned(), "work".to_owned()),
                ("pwd".to_owned(), "main".to_owned())
            ]
        );
        assert!(!runner.supports_resume());
        assert!(!runner.has_session("ABCD1234").await);
    }

    #[tokio::test]
    async fn missing_session_is_configuration_error() {
        let runner = InjectRunner::new(Arc::new(Recorder::default()), None);
        let err = runner.run("ls", &RunContext::default()).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
