use std::path::Path;

use anyhow::Context;

use cr_sessions::{Repo, SessionStore};

pub async fn add(store: &SessionStore, name: &str, path: &Path) -> anyhow::Result<()> {
    let repo = store
        .register_repo(name, path)
        .await
        .with_context(|| format!("adding repo {name}"))?;
    println!("Added repo: {} -> {}", repo.name, repo.path.display());
    Ok(())
}

pub async fn remove(store: &SessionStore, name: &str) -> anyhow::Result<()> {
    let repo = store
        .deregister_repo(name)
        .await
        .with_context(|| format!("removing repo {name}"))?;
    println!("Removed repo: {}", repo.name);
    Ok(())
}

pub async fn list(store: &SessionStore) -> anyhow::Result<()> {
    println!("{}", render_list(&store.list_repos().await));
    Ok(())
}

/// Register the current directory under its base name.
pub async fn init(store: &SessionStore) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("resolving current directory")?;
    let name = cwd
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("current directory has no base name")?;
    add(store, &name, &cwd).await
}

pub fn render_list(repos: &[Repo]) -> String {
    if repos.is_empty() {
        return "No repos registered.".into();
    }
    repos
        .iter()
        .map(|r| format!("{} -> {}", r.name, r.path.display()))
        .collect::<Vec<_>>()
        .join("\n")
}
