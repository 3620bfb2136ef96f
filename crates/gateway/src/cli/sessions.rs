use anyhow::Context;

use cr_sessions::{format_sessions_list, FormatOptions, ListOptions, SessionStore};

pub struct ListArgs {
    pub repo: Option<String>,
    pub filter: Option<String>,
    pub limit: usize,
    pub debug: bool,
}

pub async fn list(store: &SessionStore, args: ListArgs, max_chars: usize) -> anyhow::Result<()> {
    println!("{}", render_list(store, args, max_chars).await);
    Ok(())
}

pub async fn render_list(store: &SessionStore, args: ListArgs, max_chars: usize) -> String {
    let entries = store
        .list_sessions(&ListOptions {
            repo_name: args.repo,
            filter: args.filter,
            limit: Some(args.limit),
        })
        .await;
    if entries.is_empty() {
        return "No active sessions.".into();
    }
    let options = FormatOptions {
        pad: true,
        session_id_column: args.debug,
        repo_column: args.debug,
        max_chars: Some(max_chars),
        ..FormatOptions::default()
    };
    format_sessions_list(&entries, &options, chrono::Utc::now().timestamp_millis())
}

pub async fn new(store: &SessionStore, repo: &str) -> anyhow::Result<()> {
    let created = store
        .create_manual_session(repo)
        .await
        .with_context(|| format!("creating session in repo {repo}"))?;
    println!("Token: {}", created.token);
    Ok(())
}

pub async fn show(store: &SessionStore, token: &str) -> anyhow::Result<()> {
    let record = store
        .find_session_by_token(token)
        .await?
        .with_context(|| format!("no session for token {token}"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub async fn remove(store: &SessionStore, token: &str) -> anyhow::Result<()> {
    let record = store
        .find_session_by_token(token)
        .await?
        .with_context(|| format!("no session for token {token}"))?;
    store.remove_session(&record.project, &record.id).await?;
    println!("Removed session {} ({})", record.token, record.id);
    Ok(())
}

pub async fn reindex(store: &SessionStore) -> anyhow::Result<()> {
    let report = store.reindex_sessions().await?;
    println!(
        "Sessions reindexed: {} session(s) across {} repo(s), {} skipped",
        report.sessions, report.repos, report.skipped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_sessions::ConversationSource;

    fn args() -> ListArgs {
        ListArgs {
            repo: None,
            filter: None,
            limit: 10,
            debug: false,
        }
    }

    #[tokio::test]
    async fn renders_table_or_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("store"))
            .with_conversations(ConversationSource::disabled());
        assert_eq!(render_list(&store, args(), 120).await, "No active sessions.");

        store.register_repo("api", dir.path()).await.unwrap();
        let created = store.create_manual_session("api").await.unwrap();

        let table = render_list(&store, args(), 120).await;
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Updated"));
        assert!(lines[1].contains(created.token.as_str()));
        assert!(!lines[1].contains(&created.session_id));

        let debug = render_list(&store, ListArgs { debug: true, ..args() }, 120).await;
        assert!(debug.contains(&created.session_id));
    }
}
