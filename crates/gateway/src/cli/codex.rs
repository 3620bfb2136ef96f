use anyhow::Context;

use cr_runners::RunnerSessionMap;
use cr_sessions::{SessionStore, TranscriptMeta};

use super::{ImportArgs, SyncAction, SyncArgs};
use crate::codex_sync::{CodexSync, ImportOptions, MigrateReport};

/// Transcripts listed before the output is cut short.
const LIST_LIMIT: usize = 200;

pub async fn sync(store: &SessionStore, map: &RunnerSessionMap, args: SyncArgs) -> anyhow::Result<()> {
    let sync = CodexSync::new(store, map);
    let options = ImportOptions {
        auto_add: args.auto_add,
        dry_run: args.dry_run,
        ..ImportOptions::default()
    };

    if args.migrate_map {
        let report = sync.migrate_map(&options).await?;
        println!("{}", render_migrate(&report, args.dry_run));
        return Ok(());
    }

    match args.action.unwrap_or(SyncAction::List) {
        SyncAction::List => {
            println!("{}", render_list(&sync.list().await));
            Ok(())
        }
        SyncAction::Import(import) => run_import(&sync, import, options).await,
    }
}

async fn run_import(
    sync: &CodexSync<'_>,
    args: ImportArgs,
    options: ImportOptions,
) -> anyhow::Result<()> {
    let options = ImportOptions {
        repo: args.repo,
        session_key: args.session_key,
        ..options
    };
    if let Some(id) = args.id {
        let meta = sync
            .find(&id)
            .await
            .with_context(|| format!("codex session id not found: {id}"))?;
        println!("{}", sync.import(&meta, &options).await?);
        return Ok(());
    }

    let outcomes = sync.import_all(&options).await?;
    if outcomes.is_empty() {
        println!("No Codex sessions found.");
    }
    for outcome in outcomes {
        println!("{outcome}");
    }
    Ok(())
}

pub fn render_list(metas: &[TranscriptMeta]) -> String {
    if metas.is_empty() {
        return "No Codex sessions found.".into();
    }
    let mut lines = vec![format!("Found {} Codex sessions:", metas.len())];
    for meta in metas.iter().take(LIST_LIMIT) {
        let file = meta
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        lines.push(format!(
            "- {} | {} | {} | {}",
            meta.id,
            meta.timestamp.as_deref().unwrap_or("n/a"),
            meta.cwd
                .as_ref()
                .map_or_else(|| "n/a".to_owned(), |p| p.display().to_string()),
            file
        ));
    }
    if metas.len() > LIST_LIMIT {
        lines.push(format!("...and {} more", metas.len() - LIST_LIMIT));
    }
    lines.join("\n")
}

pub fn render_migrate(report: &MigrateReport, dry_run: bool) -> String {
    let prefix = if dry_run { "[dry-run] Would migrate" } else { "Migrated" };
    let mut lines = vec![format!(
        "{prefix} {} legacy mapping(s) to token keys.",
        report.migrated.len()
    )];
    let seeded = if dry_run { "[dry-run] Would seed" } else { "Seeded" };
    lines.push(format!("{seeded} {} continuation(s) from imported sessions.", report.seeded));
    for key in &report.unresolved {
        lines.push(format!("Left in place: {key}"));
    }
    lines.join("\n")
}
