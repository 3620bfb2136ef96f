use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use cr_domain::config::Config;
use cr_gateway::api;
use cr_gateway::bootstrap;
use cr_gateway::cli::{
    self, Cli, CodexCommand, Command, ConfigCommand, RepoCommand, RunnerCommand,
    SessionsCommand,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            let (config, config_path) = cli::load_config()?;
            init_tracing();
            tracing::info!(config = %config_path, "configuration loaded");
            run_server(Arc::new(config)).await
        }
        Some(Command::Repo(cmd)) => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            let store = bootstrap::open_store(&config).await?;
            match cmd {
                RepoCommand::Add { name, path } => cli::repo::add(&store, &name, &path).await,
                RepoCommand::Remove { name } => cli::repo::remove(&store, &name).await,
                RepoCommand::List => cli::repo::list(&store).await,
                RepoCommand::Init => cli::repo::init(&store).await,
            }
        }
        Some(Command::Sessions(cmd)) => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            let store = bootstrap::open_store(&config).await?;
            match cmd {
                SessionsCommand::List {
                    repo,
                    filter,
                    limit,
                    debug,
                } => {
                    let args = cli::sessions::ListArgs {
                        repo,
                        filter,
                        limit,
                        debug,
                    };
                    cli::sessions::list(&store, args, config.listing.max_conversation_chars).await
                }
                SessionsCommand::New { repo } => cli::sessions::new(&store, &repo).await,
                SessionsCommand::Show { token } => cli::sessions::show(&store, &token).await,
                SessionsCommand::Remove { token } => cli::sessions::remove(&store, &token).await,
                SessionsCommand::Reindex => cli::sessions::reindex(&store).await,
            }
        }
        Some(Command::Run { token, prompt }) => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            let state = bootstrap::build_app_state(Arc::new(config)).await?;
            cli::run::run(&state, &token, &prompt.join(" ")).await
        }
        Some(Command::Runner(RunnerCommand::Clear { key })) => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            let runner = cr_runners::build_runner(&config);
            cli::runner::clear(runner.as_ref(), key.as_deref()).await
        }
        Some(Command::Codex(CodexCommand::Sync(args))) => {
            init_cli_tracing();
            let (config, _) = cli::load_config()?;
            let store = bootstrap::open_store(&config).await?;
            let map = cr_runners::RunnerSessionMap::new(cr_runners::session_map_path(&config));
            cli::codex::sync(&store, &map, args).await
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _) = cli::load_config()?;
            cli::config::show(&config)
        }
        Some(Command::Version) => {
            println!("coderelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cr_gateway=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Initialize compact stderr-only tracing for CLI one-shot commands.
///
/// Defaults to `warn` level so diagnostic output does not pollute stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("coderelay starting");

    let state = bootstrap::build_app_state(config.clone()).await?;

    // ── Concurrency limit (backpressure protection) ────────────────
    let max_concurrent = std::env::var("CR_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    let app = api::router()
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "coderelay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM, then return to trigger graceful shutdown of
/// the Axum server.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}
