//! AppState construction shared by `serve` and the one-shot CLI commands.

use std::sync::Arc;

use anyhow::Context;

use cr_domain::config::Config;
use cr_runners::{build_runner, Runner};
use cr_sessions::{ConversationSource, CurrentTokenStore, SessionStore};

use crate::dispatch::Dispatcher;
use crate::safety::CommandSafety;
use crate::state::AppState;

/// Open the session store rooted at `storage.root`, with transcript lookup
/// under `listing.codex_sessions_dir`.
pub async fn open_store(config: &Config) -> anyhow::Result<SessionStore> {
    let root = &config.storage.root;
    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("creating storage root {}", root.display()))?;

    let conversations = ConversationSource::new(config.listing.codex_sessions_dir.clone());
    Ok(SessionStore::new(root.clone()).with_conversations(conversations))
}

/// Initialize every subsystem with the runner chosen by `runner.kind`.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let runner = build_runner(&config);
    build_app_state_with_runner(config, runner).await
}

/// Same as [`build_app_state`] with an explicit runner (used by tests).
pub async fn build_app_state_with_runner(
    config: Arc<Config>,
    runner: Arc<dyn Runner>,
) -> anyhow::Result<AppState> {
    // ── Session store ────────────────────────────────────────────────
    let store = Arc::new(open_store(&config).await?);
    let current = Arc::new(CurrentTokenStore::new(store.layout().current_path()));
    tracing::info!(root = %config.storage.root.display(), "session store ready");

    // ── Compile command denied-patterns at startup ───────────────────
    let safety = CommandSafety::new(
        &config.dispatch.denied_patterns,
        config.dispatch.max_command_length,
    )
    .context("invalid regex in dispatch.denied_patterns")?;
    tracing::info!(
        patterns = config.dispatch.denied_patterns.len(),
        "command denied-patterns compiled"
    );

    // ── Dispatcher ───────────────────────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        current.clone(),
        runner.clone(),
        safety,
        config.dispatch.clone(),
        config.listing.max_conversation_chars,
    ));
    tracing::info!(runner = runner.name(), "dispatcher ready");

    Ok(AppState {
        config,
        store,
        current,
        runner,
        dispatcher,
    })
}
