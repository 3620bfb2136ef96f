use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Apply the environment overrides recognised by the runners.
    ///
    /// Called once after parsing the TOML file so operators can tweak the
    /// codex invocation without editing config.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// injectable lookup (used by tests).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let codex = &mut self.runner.codex;
        if let Some(bin) = lookup("CODEX_BIN").filter(|v| !v.trim().is_empty()) {
            codex.bin = bin;
        }
        if let Some(args) = lookup("CODEX_ARGS") {
            codex.args = split_args(&args);
        }
        if let Some(sandbox) = lookup("CODEX_SANDBOX").filter(|v| !v.trim().is_empty()) {
            codex.sandbox = sandbox;
        }
        if let Some(v) = lookup("CODEX_FULL_AUTO") {
            codex.full_auto = parse_flag(&v);
        }
        if let Some(v) = lookup("CODEX_SKIP_GIT_CHECK") {
            codex.skip_git_check = parse_flag(&v);
        }
        if let Some(kind) = lookup("CR_RUNNER") {
            match kind.trim().to_ascii_lowercase().as_str() {
                "codex" => self.runner.kind = RunnerKind::Codex,
                "inject" | "claude" => self.runner.kind = RunnerKind::Inject,
                other => tracing::warn!(value = other, "ignoring unknown CR_RUNNER value"),
            }
        }
    }
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_owned).collect()
}

fn parse_flag(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the repo registry, token directory, session index, per-repo
/// session files and runner session map live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "d_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: d_root() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runners
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// Forward prompts into an already-running interactive session.
    #[default]
    Inject,
    /// Spawn a resumable `codex exec` process per command.
    Codex,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunnerConfig {
    #[serde(default)]
    pub kind: RunnerKind,
    #[serde(default)]
    pub codex: CodexConfig,
    #[serde(default)]
    pub inject: InjectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexConfig {
    /// Executable name or path.
    #[serde(default = "d_codex_bin")]
    pub bin: String,
    /// Extra arguments passed through before the prompt.
    #[serde(default)]
    pub args: Vec<String>,
    /// Value of `--sandbox`.
    #[serde(default = "d_sandbox")]
    pub sandbox: String,
    #[serde(default)]
    pub full_auto: bool,
    #[serde(default)]
    pub skip_git_check: bool,
    /// Working directory used when the caller supplies none.  Defaults to
    /// the process working directory.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    /// Continuation map file.  Defaults to `<storage.root>/codex-session-map.json`.
    #[serde(default)]
    pub session_map_path: Option<PathBuf>,
    /// Keep the per-invocation output-capture files instead of deleting
    /// them once read.
    #[serde(default)]
    pub keep_output_files: bool,
    /// Log the full command line of every invocation.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            bin: d_codex_bin(),
            args: Vec::new(),
            sandbox: d_sandbox(),
            full_auto: false,
            skip_git_check: false,
            workdir: None,
            session_map_path: None,
            keep_output_files: false,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectConfig {
    #[serde(default = "d_tmux_bin")]
    pub tmux_bin: String,
    /// Target used when a session record carries no tmux session name.
    #[serde(default = "d_tmux_session")]
    pub default_session: String,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            tmux_bin: d_tmux_bin(),
            default_session: d_tmux_session(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Messages allowed per chat inside one window.
    #[serde(default = "d_20")]
    pub rate_limit_max: usize,
    #[serde(default = "d_60000")]
    pub rate_limit_window_ms: u64,
    /// Commands longer than this are rejected by the safety check.
    #[serde(default = "d_1000")]
    pub max_command_length: usize,
    /// Replies longer than this are split into several messages.
    #[serde(default = "d_3500")]
    pub max_reply_chars: usize,
    /// Rows shown by `/sessions list`.
    #[serde(default = "d_10")]
    pub list_limit: usize,
    /// Regex patterns rejected by the command-safety check.
    #[serde(default = "d_denied_patterns")]
    pub denied_patterns: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit_max: 20,
            rate_limit_window_ms: 60_000,
            max_command_length: 1000,
            max_reply_chars: 3500,
            list_limit: 10,
            denied_patterns: d_denied_patterns(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session listing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    /// Root of the external tool's transcript files, scanned to summarise
    /// conversations.
    #[serde(default = "d_codex_sessions_dir")]
    pub codex_sessions_dir: PathBuf,
    #[serde(default = "d_120")]
    pub max_conversation_chars: usize,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            codex_sessions_dir: d_codex_sessions_dir(),
            max_conversation_chars: 120,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_3310")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3310,
            host: d_host(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
fn d_root() -> PathBuf {
    home_dir().join(".coderelay")
}
fn d_codex_sessions_dir() -> PathBuf {
    home_dir().join(".codex").join("sessions")
}
fn d_codex_bin() -> String {
    "codex".into()
}
fn d_sandbox() -> String {
    "read-only".into()
}
fn d_tmux_bin() -> String {
    "tmux".into()
}
fn d_tmux_session() -> String {
    "default".into()
}
fn d_denied_patterns() -> Vec<String> {
    [
        r"(?i)rm\s+-rf",
        r"(?i)sudo\s+",
        r"(?i)chmod\s+777",
        r"(?i)>\s*/dev/null",
        r"(?i)curl.*\|\s*sh",
        r"(?i)wget.*\|\s*sh",
        r"(?i)eval\s*\(",
        r"(?i)exec\s*\(",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_3310() -> u16 {
    3310
}
fn d_10() -> usize {
    10
}
fn d_20() -> usize {
    20
}
fn d_120() -> usize {
    120
}
fn d_1000() -> usize {
    1000
}
fn d_3500() -> usize {
    3500
}
fn d_60000() -> u64 {
    60_000
}
