//! Command runners for coderelay.
//!
//! A [`Runner`] executes one command against the coding assistant.  The
//! inject variant types it into a live tmux session; the codex variant
//! spawns a resumable `codex exec` process per command and remembers the
//! thread it belongs to in a [`RunnerSessionMap`].

pub mod codex;
pub mod inject;
pub mod process;
pub mod runner;
pub mod session_map;

use std::sync::Arc;

use cr_domain::config::{Config, RunnerKind};

pub use codex::CodexRunner;
pub use inject::{CommandInjector, InjectRunner, TmuxInjector};
pub use process::{
    Invocation, InvocationState, ProcessHandle, ProcessSpawner, SpawnSpec, StreamCapture,
    TokioSpawner,
};
pub use runner::{RunContext, RunOutput, Runner};
pub use session_map::RunnerSessionMap;

/// Where the codex continuation map lives for `config`.
pub fn session_map_path(config: &Config) -> std::path::PathBuf {
    config
        .runner
        .codex
        .session_map_path
        .clone()
        .unwrap_or_else(|| config.storage.root.join(session_map::SESSION_MAP_FILE))
}

/// Build the runner selected by `runner.kind`.
pub fn build_runner(config: &Config) -> Arc<dyn Runner> {
    match config.runner.kind {
        RunnerKind::Codex => {
            tracing::info!(bin = %config.runner.codex.bin, "using codex runner");
            Arc::new(CodexRunner::new(&config.runner.codex, session_map_path(config)))
        }
        RunnerKind::Inject => {
            let inject = &config.runner.inject;
            tracing::info!(tmux = %inject.tmux_bin, "using inject runner");
            Arc::new(InjectRunner::new(
                Arc::new(TmuxInjector::new(inject.tmux_bin.clone())),
                Some(inject.default_session.clone()),
            ))
        }
    }
}
