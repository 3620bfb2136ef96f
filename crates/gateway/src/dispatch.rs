//! Channel-agnostic inbound dispatcher.
//!
//! Every connector normalises its messages into an [`InboundMessage`] and
//! gets back the list of replies to send.  Handling order is fixed: rate
//! limit, then chat commands, then token commands.  A command addressed to a
//! token passes the safety check, is resolved through the session store,
//! and is handed to the configured runner with the token as session key.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use cr_domain::config::DispatchConfig;
use cr_domain::error::Result;
use cr_domain::token::TOKEN_LEN;
use cr_domain::trace::TraceEvent;
use cr_domain::Token;
use cr_runners::{RunContext, RunOutput, Runner};
use cr_sessions::{
    format_conversation, format_sessions_list, CodexContinuation, CurrentTokenStore,
    FormatOptions, ListOptions, SessionRecord, SessionStore, Stamp,
};

use crate::limiter::RateLimiter;
use crate::safety::CommandSafety;

pub const RATE_LIMITED: &str = "Rate limit exceeded. Please try again later.";
pub const UNSAFE_COMMAND: &str = "Command rejected by safety checks.";
pub const UNKNOWN_TOKEN: &str = "Invalid token. Please wait for a new task notification.";
pub const INVALID_FORMAT: &str = "Invalid format. Use:\n/cmd <TOKEN> <command>\n\n\
     Example:\n/cmd ABC12345 analyze this code";

const WELCOME: &str = "Welcome to coderelay!\n\n\
     You will be notified when the assistant finishes a task or needs input.\n\n\
     When a notification carries a token, send commands back with:\n\
     /cmd <TOKEN> <your command>\n\n\
     Type /help for more information.";

const HELP: &str = "coderelay help\n\n\
     Commands:\n\
     • /start - Welcome message\n\
     • /help - Show this help\n\
     • /cmd <TOKEN> <command> - Send a command to the assistant\n\
     • /work-on <TOKEN> - Set the default token for this chat\n\
     • /repo list - List registered repos\n\
     • /repo work-on --repo <name> - Create a token and set it\n\
     • /sessions list [--repo <name>] [--filter <text>] - List recent sessions\n\
     • /sessions new --repo <name> - Create a new token\n\n\
     Example:\n\
     /cmd ABC12345 analyze the performance of this function";

/// Width of the command echo in reply headers.
const COMMAND_PREVIEW_CHARS: usize = 40;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    /// Connector name: `"telegram"`, `"line"`, `"email"`, ...
    pub channel: String,
    pub chat_id: String,
    pub text: String,
}

impl InboundMessage {
    /// Key for rate limiting and the working-token store.
    pub fn chat_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Start,
    Help,
    /// `None` when the argument is missing or not a token.
    WorkOn(Option<Token>),
    RepoList,
    RepoWorkOn(Option<String>),
    SessionsList {
        repo: Option<String>,
        filter: Option<String>,
    },
    SessionsNew(Option<String>),
    /// `/cmd <TOKEN> <command>` or `<TOKEN> <command>`.
    Cmd { token: Token, command: String },
    /// Anything else; routed to the chat's working token.
    Bare(String),
}

pub fn parse_command(text: &str) -> ChatCommand {
    let text = text.trim();
    match text {
        "/start" => return ChatCommand::Start,
        "/help" => return ChatCommand::Help,
        "/repo list" => return ChatCommand::RepoList,
        _ => {}
    }

    if let Some(rest) = text.strip_prefix("/work-on") {
        let token = rest
            .starts_with(char::is_whitespace)
            .then(|| rest.trim())
            .filter(|t| is_token_shaped(t, false))
            .and_then(|t| Token::parse(t).ok());
        return ChatCommand::WorkOn(token);
    }
    if let Some(rest) = text.strip_prefix("/repo work-on") {
        return ChatCommand::RepoWorkOn(repo_flag_only(rest));
    }
    if let Some(rest) = text.strip_prefix("/sessions list") {
        let (repo, filter) = sessions_list_flags(rest);
        return ChatCommand::SessionsList { repo, filter };
    }
    if let Some(rest) = text.strip_prefix("/sessions new") {
        return ChatCommand::SessionsNew(repo_flag_only(rest));
    }

    let explicit = text
        .get(..4)
        .filter(|p| p.eq_ignore_ascii_case("/cmd"))
        .map(|_| &text[4..])
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .and_then(|rest| split_token_command(rest.trim_start(), false));
    if let Some((token, command)) = explicit.or_else(|| split_token_command(text, true)) {
        if let Ok(token) = Token::parse(token) {
            return ChatCommand::Cmd {
                token,
                command: command.to_owned(),
            };
        }
    }

    ChatCommand::Bare(text.to_owned())
}

/// Eight characters from `[A-Z0-9]`; lowercase letters only when
/// `uppercase_only` is false.
fn is_token_shaped(s: &str, uppercase_only: bool) -> bool {
    s.len() == TOKEN_LEN
        && s.chars().all(|c| {
            c.is_ascii_digit() || c.is_ascii_uppercase() || (!uppercase_only && c.is_ascii_lowercase())
        })
}

/// `<TOKEN> <command...>` with a non-empty command.
fn split_token_command(text: &str, uppercase_only: bool) -> Option<(&str, &str)> {
    let (head, rest) = text.split_once(char::is_whitespace)?;
    let command = rest.trim();
    (is_token_shaped(head, uppercase_only) && !command.is_empty()).then_some((head, command))
}

/// Exactly `--repo <name>` and nothing else.
fn repo_flag_only(rest: &str) -> Option<String> {
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let words: Vec<&str> = rest.split_whitespace().collect();
    match words.as_slice() {
        [flag, name] if flag.eq_ignore_ascii_case("--repo") => Some((*name).to_owned()),
        _ => None,
    }
}

/// `--repo <name>` anywhere; `--filter` swallows the remaining words.
fn sessions_list_flags(rest: &str) -> (Option<String>, Option<String>) {
    let words: Vec<&str> = rest.split_whitespace().collect();
    let mut repo = None;
    let mut filter = None;
    let mut i = 0;
    while i < words.len() {
        match words[i] {
            "--repo" if i + 1 < words.len() => {
                repo = Some(words[i + 1].to_owned());
                i += 2;
            }
            "--filter" if i + 1 < words.len() => {
                filter = Some(words[i + 1..].join(" "));
                break;
            }
            _ => i += 1,
        }
    }
    (repo, filter)
}

/// Split `header + body` into messages of at most `max_chars` characters.
/// The header only prefixes the first message.
pub fn chunk_reply(header: &str, body: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = body.chars().collect();
    let first_len = max_chars
        .saturating_sub(header.chars().count())
        .min(chars.len());

    let first: String = chars[..first_len].iter().collect();
    let mut replies = vec![format!("{header}{first}")];
    replies.extend(
        chars[first_len..]
            .chunks(max_chars)
            .map(|chunk| chunk.iter().collect::<String>()),
    );
    replies
}

fn command_preview(command: &str) -> String {
    let single_line = command.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= COMMAND_PREVIEW_CHARS {
        return single_line;
    }
    let kept: String = single_line
        .chars()
        .take(COMMAND_PREVIEW_CHARS.saturating_sub(3))
        .collect();
    format!("{kept}...")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Dispatcher {
    store: Arc<SessionStore>,
    current: Arc<CurrentTokenStore>,
    runner: Arc<dyn Runner>,
    limiter: RateLimiter,
    safety: CommandSafety,
    config: DispatchConfig,
    max_conversation_chars: usize,
}

impl Dispatcher {
    pub fn new(
        store: Arc<SessionStore>,
        current: Arc<CurrentTokenStore>,
        runner: Arc<dyn Runner>,
        safety: CommandSafety,
        config: DispatchConfig,
        max_conversation_chars: usize,
    ) -> Self {
        Self {
            store,
            current,
            runner,
            limiter: RateLimiter::new(),
            safety,
            config,
            max_conversation_chars,
        }
    }

    /// Handle one inbound message and return the replies, in order.
    pub async fn handle(&self, msg: &InboundMessage) -> Vec<String> {
        let text = msg.text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let chat_key = msg.chat_key();
        let window = Duration::from_millis(self.config.rate_limit_window_ms);
        let decision = self
            .limiter
            .check(&chat_key, self.config.rate_limit_max, window);
        if !decision.allowed {
            self.reject(msg, "rate_limited");
            return vec![RATE_LIMITED.into()];
        }

        match parse_command(text) {
            ChatCommand::Start => vec![WELCOME.into()],
            ChatCommand::Help => vec![HELP.into()],
            ChatCommand::WorkOn(token) => vec![self.work_on(&chat_key, token).await],
            ChatCommand::RepoList => vec![self.repo_list().await],
            ChatCommand::RepoWorkOn(repo) => vec![self.repo_work_on(&chat_key, repo).await],
            ChatCommand::SessionsList { repo, filter } => {
                vec![self.sessions_list(repo, filter).await]
            }
            ChatCommand::SessionsNew(repo) => vec![self.sessions_new(repo).await],
            ChatCommand::Cmd { token, command } => {
                self.process_command(msg, &chat_key, token.as_str(), &command)
                    .await
            }
            ChatCommand::Bare(text) => match self.current.get(&chat_key).await {
                Some(token) => {
                    self.process_command(msg, &chat_key, token.as_str(), &text)
                        .await
                }
                None => vec![INVALID_FORMAT.into()],
            },
        }
    }

    fn reject(&self, msg: &InboundMessage, reason: &str) {
        TraceEvent::InboundRejected {
            channel: msg.channel.clone(),
            chat_id: msg.chat_id.clone(),
            reason: reason.to_owned(),
        }
        .emit();
    }

    /// Lookup failures are logged and treated as unknown tokens.
    async fn lookup(&self, token: &str) -> Option<SessionRecord> {
        match self.store.find_session_by_token(token).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(token, error = %e, "session lookup failed");
                None
            }
        }
    }

    async fn summary(&self, record: &SessionRecord) -> String {
        let view = self.store.conversations().for_record(record).await;
        format_conversation(&view.conversation, Some(self.max_conversation_chars))
    }

    // ── Chat commands ───────────────────────────────────────────────

    async fn work_on(&self, chat_key: &str, token: Option<Token>) -> String {
        let Some(token) = token else {
            return "Usage: /work-on <TOKEN>".into();
        };
        let Some(record) = self.lookup(token.as_str()).await else {
            return "Invalid token.".into();
        };
        if let Err(e) = self.current.set(chat_key, token.clone()).await {
            return format!("Failed to set work token: {e}");
        }
        format!(
            "Working token set: {token}\nSummary: {}",
            self.summary(&record).await
        )
    }

    async fn repo_list(&self) -> String {
        let repos = self.store.list_repos().await;
        if repos.is_empty() {
            return "No repos registered.".into();
        }
        let lines: Vec<String> = repos
            .iter()
            .map(|r| format!("• {} -> {}", r.name, r.path.display()))
            .collect();
        format!("Repos:\n{}", lines.join("\n"))
    }

    async fn repo_work_on(&self, chat_key: &str, repo: Option<String>) -> String {
        let Some(repo) = repo else {
            return "Usage: /repo work-on --repo <name>".into();
        };
        let created = match self.store.create_manual_session(&repo).await {
            Ok(created) => created,
            Err(e) => return format!("Failed to set work token: {e}"),
        };
        if let Err(e) = self.current.set(chat_key, created.token.clone()).await {
            return format!("Failed to set work token: {e}");
        }
        let summary = match self.lookup(created.token.as_str()).await {
            Some(record) => self.summary(&record).await,
            None => format_conversation(&Default::default(), None),
        };
        format!("Working token set: {}\nSummary: {summary}", created.token)
    }

    async fn sessions_list(&self, repo: Option<String>, filter: Option<String>) -> String {
        let entries = self
            .store
            .list_sessions(&ListOptions {
                repo_name: repo,
                filter,
                limit: Some(self.config.list_limit),
            })
            .await;
        if entries.is_empty() {
            return "No active sessions.".into();
        }
        let options = FormatOptions {
            max_chars: Some(self.max_conversation_chars),
            ..FormatOptions::default()
        };
        let now_ms = chrono::Utc::now().timestamp_millis();
        format!(
            "Sessions:\n{}",
            format_sessions_list(&entries, &options, now_ms)
        )
    }

    async fn sessions_new(&self, repo: Option<String>) -> String {
        let Some(repo) = repo else {
            return "Usage: /sessions new --repo <name>".into();
        };
        match self.store.create_manual_session(&repo).await {
            Ok(created) => format!("Token created: {}", created.token),
            Err(e) => format!("Failed to create token: {e}"),
        }
    }

    // ── Token commands ──────────────────────────────────────────────

    async fn process_command(
        &self,
        msg: &InboundMessage,
        chat_key: &str,
        raw_token: &str,
        command: &str,
    ) -> Vec<String> {
        if !self.safety.is_safe(command) {
            self.reject(msg, "unsafe_command");
            return vec![UNSAFE_COMMAND.into()];
        }
        let Some(record) = self.lookup(raw_token).await else {
            self.reject(msg, "unknown_token");
            return vec![UNKNOWN_TOKEN.into()];
        };

        let token = record.token.clone();
        let output = match self.execute(&record, command).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(token = %token, runner = self.runner.name(), error = %e, "command execution failed");
                return vec![format!("Command execution failed: {e}")];
            }
        };
        tracing::info!(chat = chat_key, token = %token, runner = self.runner.name(), "command handled");

        if output.final_text.trim().is_empty() {
            let target = record.tmux_session.as_deref().unwrap_or("default");
            return vec![format!(
                "Command sent successfully.\n\nCommand: {command}\nSession: {target}\n\n\
                 The assistant is now processing your request..."
            )];
        }

        let working = self.current.get(chat_key).await;
        let header = if working.as_ref() == Some(&token) {
            String::new()
        } else {
            format!("Reply on [{token}] {}:\n", command_preview(command))
        };
        chunk_reply(&header, &output.final_text, self.config.max_reply_chars)
    }

    /// Run `command` against the session's workdir, keyed by its token.
    /// Resumes when the runner already holds a continuation for the key.
    pub async fn execute(&self, record: &SessionRecord, command: &str) -> Result<RunOutput> {
        let ctx = RunContext {
            session_key: record.token.to_string(),
            workdir: Some(record.workdir.clone()),
            sandbox: None,
            tmux_session: record.tmux_session.clone(),
        };
        let resumable =
            self.runner.supports_resume() && self.runner.has_session(ctx.key()).await;
        let output = if resumable {
            self.runner.resume(command, &ctx).await?
        } else {
            self.runner.run(command, &ctx).await?
        };
        tracing::debug!(token = %record.token, resumed = resumable, queued = output.queued, "runner finished");
        self.record_activity(record, &output).await;
        Ok(output)
    }

    /// Stamp the command time and attach a newly issued continuation.
    async fn record_activity(&self, record: &SessionRecord, output: &RunOutput) {
        let continuation = output.continuation_id.clone();
        let updated = self
            .store
            .update_session(&record.project, &record.id, move |r| {
                r.last_command = Some(Stamp::now());
                if let Some(id) = continuation {
                    if r.codex.as_ref().map(|c| c.session_id.as_str()) != Some(id.as_str()) {
                        r.codex = Some(CodexContinuation {
                            session_id: id,
                            model_provider: None,
                            cli_version: None,
                        });
                    }
                }
            })
            .await;
        if let Err(e) = updated {
            tracing::warn!(session_id = %record.id, error = %e, "failed to record session activity");
        }
    }
}
