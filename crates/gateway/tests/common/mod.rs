#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use cr_domain::config::Config;
use cr_domain::error::{Error, Result};
use cr_domain::Token;
use cr_gateway::bootstrap::build_app_state_with_runner;
use cr_gateway::dispatch::InboundMessage;
use cr_gateway::state::AppState;
use cr_runners::{RunContext, RunOutput, Runner};

#[derive(Debug, Clone)]
pub struct Call {
    pub resumed: bool,
    pub prompt: String,
    pub ctx: RunContext,
}

/// In-memory runner that answers with a fixed reply and remembers every
/// call.  A successful call issues continuation `thread-<key>`.
#[derive(Default)]
pub struct FakeRunner {
    pub resumable: bool,
    pub reply: String,
    pub failure: Option<String>,
    pub calls: Mutex<Vec<Call>>,
    pub sessions: Mutex<HashSet<String>>,
}

impl FakeRunner {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.into(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, resumed: bool, prompt: &str, ctx: &RunContext) -> Result<RunOutput> {
        self.calls.lock().unwrap().push(Call {
            resumed,
            prompt: prompt.into(),
            ctx: ctx.clone(),
        });
        if let Some(message) = &self.failure {
            return Err(Error::ExternalProcess(message.clone()));
        }
        self.sessions.lock().unwrap().insert(ctx.key().to_owned());
        Ok(RunOutput {
            final_text: self.reply.clone(),
            continuation_id: Some(format!("thread-{}", ctx.key())),
            ..RunOutput::default()
        })
    }
}

#[async_trait::async_trait]
impl Runner for FakeRunner {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn supports_resume(&self) -> bool {
        self.resumable
    }

    async fn run(&self, prompt: &str, ctx: &RunContext) -> Result<RunOutput> {
        self.answer(false, prompt, ctx)
    }

    async fn resume(&self, prompt: &str, ctx: &RunContext) -> Result<RunOutput> {
        self.answer(true, prompt, ctx)
    }

    async fn has_session(&self, session_key: &str) -> bool {
        self.sessions.lock().unwrap().contains(session_key)
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub state: AppState,
    pub runner: Arc<FakeRunner>,
}

impl Harness {
    pub async fn new(runner: FakeRunner) -> Self {
        Self::with_config(runner, |_| {}).await
    }

    pub async fn with_config(runner: FakeRunner, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.root = dir.path().join("store");
        config.listing.codex_sessions_dir = dir.path().join("transcripts");
        tweak(&mut config);

        let runner = Arc::new(runner);
        let state = build_app_state_with_runner(Arc::new(config), runner.clone())
            .await
            .unwrap();
        Self { dir, state, runner }
    }

    /// Register `name` pointing at a fresh directory and create one manual
    /// session in it.
    pub async fn repo_with_session(&self, name: &str) -> Token {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        self.state.store.register_repo(name, &path).await.unwrap();
        self.state
            .store
            .create_manual_session(name)
            .await
            .unwrap()
            .token
    }

    pub async fn send(&self, text: &str) -> Vec<String> {
        self.send_from("42", text).await
    }

    pub async fn send_from(&self, chat_id: &str, text: &str) -> Vec<String> {
        let msg = InboundMessage {
            channel: "telegram".into(),
            chat_id: chat_id.into(),
            text: text.into(),
        };
        self.state.dispatcher.handle(&msg).await
    }
}
