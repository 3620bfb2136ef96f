pub mod codex;
pub mod config;
pub mod repo;
pub mod run;
pub mod runner;
pub mod sessions;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use cr_domain::config::Config;

/// coderelay: drive a local coding assistant from chat.
#[derive(Debug, Parser)]
#[command(name = "coderelay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP gateway (default when no subcommand is given).
    Serve,
    /// Manage registered repositories.
    #[command(subcommand)]
    Repo(RepoCommand),
    /// Manage token-bound sessions.
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Send one command to the session behind a token and print the reply.
    Run {
        /// Session token.
        token: String,
        /// The command text.
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Runner state utilities.
    #[command(subcommand)]
    Runner(RunnerCommand),
    /// Bring threads started directly with the codex CLI under token control.
    #[command(subcommand)]
    Codex(CodexCommand),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum RepoCommand {
    /// Register a repository under a name.
    Add { name: String, path: PathBuf },
    /// Deregister a repository.  Its session files are left in place.
    Remove { name: String },
    /// List registered repositories.
    List,
    /// Register the current directory under its base name.
    Init,
}

#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    /// List sessions by most recent activity.
    List {
        #[arg(long)]
        repo: Option<String>,
        /// Case-insensitive text matched against the conversation.
        #[arg(long)]
        filter: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Show the session id and repo columns.
        #[arg(long)]
        debug: bool,
    },
    /// Create a manual session and print its token.
    New {
        #[arg(long)]
        repo: String,
    },
    /// Print the record behind a token as JSON.
    Show { token: String },
    /// Delete the session behind a token.
    Remove { token: String },
    /// Rebuild the token directory and session index from the record files.
    Reindex,
}

#[derive(Debug, Subcommand)]
pub enum RunnerCommand {
    /// Forget stored continuations, for one key or all of them.
    Clear {
        #[arg(long)]
        key: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum CodexCommand {
    /// List or import codex transcripts (lists when no action is given).
    Sync(SyncArgs),
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub action: Option<SyncAction>,
    /// Move chat-keyed continuations onto tokens and seed the map from
    /// imported records.
    #[arg(long)]
    pub migrate_map: bool,
    /// Register repos for unknown working directories.
    #[arg(long, global = true)]
    pub auto_add: bool,
    /// Report what would change without writing anything.
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Debug, Subcommand)]
pub enum SyncAction {
    /// List transcripts found under the codex sessions directory.
    List,
    /// Import transcripts as codex sessions.
    Import(ImportArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Import every transcript.
    #[arg(long, conflicts_with = "id", required_unless_present = "id")]
    pub all: bool,
    /// Import the thread with this id.
    #[arg(long)]
    pub id: Option<String>,
    /// Target repo, instead of the one registered for the thread's cwd.
    #[arg(long)]
    pub repo: Option<String>,
    /// Continuation-map key to bind instead of the new token.
    #[arg(long, alias = "bind", conflicts_with = "all")]
    pub session_key: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `CR_CONFIG` (or
/// `config.toml` by default), then apply environment overrides.  Returns
/// the parsed [`Config`] and the path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("CR_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let mut config = load_config_from(&config_path)?;
    config.apply_env_overrides();
    Ok((config, config_path))
}

/// Parse `path`, or return the defaults when it does not exist.
pub fn load_config_from(path: &str) -> anyhow::Result<Config> {
    if !std::path::Path::new(path).exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    toml::from_str(&raw).with_context(|| format!("parsing {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_collects_trailing_words() {
        let cli = Cli::try_parse_from(["coderelay", "run", "ABCD1234", "fix", "the", "tests"])
            .unwrap();
        match cli.command {
            Some(Command::Run { token, prompt }) => {
                assert_eq!(token, "ABCD1234");
                assert_eq!(prompt, ["fix", "the", "tests"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["coderelay"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn runner_clear_key_is_optional() {
        let cli = Cli::try_parse_from(["coderelay", "runner", "clear", "--key", "K"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Runner(RunnerCommand::Clear { key: Some(ref k) })) if k == "K"
        ));
    }

    #[test]
    fn codex_sync_flags_parse() {
        let cli = Cli::try_parse_from([
            "coderelay", "codex", "sync", "import", "--all", "--repo", "api", "--dry-run",
        ])
        .unwrap();
        let Some(Command::Codex(CodexCommand::Sync(args))) = cli.command else {
            panic!("expected codex sync");
        };
        assert!(args.dry_run);
        assert!(!args.auto_add);
        match args.action {
            Some(SyncAction::Import(import)) => {
                assert!(import.all);
                assert_eq!(import.repo.as_deref(), Some("api"));
            }
            other => panic!("unexpected action: {other:?}"),
        }

        assert!(Cli::try_parse_from(["coderelay", "codex", "sync", "import"]).is_err());
        assert!(Cli::try_parse_from([
            "coderelay", "codex", "sync", "import", "--all", "--id", "x"
        ])
        .is_err());

        let cli = Cli::try_parse_from(["coderelay", "codex", "sync", "--migrate-map"]).unwrap();
        let Some(Command::Codex(CodexCommand::Sync(args))) = cli.command else {
            panic!("expected codex sync");
        };
        assert!(args.migrate_map);
        assert!(args.action.is_none());
    }

    #[test]
    fn missing_config_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 3310);
    }

    #[test]
    fn config_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[runner]\nkind = \"codex\"\n\n[server]\nport = 9000\n").unwrap();
        let config = load_config_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.runner.kind, cr_domain::config::RunnerKind::Codex);
    }

    #[test]
    fn bad_config_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        let err = load_config_from(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().starts_with("parsing "));
    }
}
