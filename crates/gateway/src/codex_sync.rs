//! Import threads started directly with the codex CLI as token-bound
//! sessions, and bring the runner's continuation map in line with the
//! session directory.
//!
//! Imported records take the thread id as their session id, so importing a
//! transcript twice finds the first import instead of minting a second
//! token.

use std::path::PathBuf;

use cr_domain::error::{Error, Result};
use cr_domain::trace::TraceEvent;
use cr_domain::Token;
use cr_runners::RunnerSessionMap;
use cr_sessions::{Channel, CodexContinuation, Notification, SessionStore, TranscriptMeta};

/// Continuation-map keys written by older chat integrations, which keyed
/// threads by chat instead of by token.
const LEGACY_KEY_PREFIXES: [&str; 3] = ["telegram:", "line:", "email:"];

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Import into this repo instead of matching the transcript's cwd.
    pub repo: Option<String>,
    /// Continuation-map key to bind.  Defaults to the new token.
    pub session_key: Option<String>,
    /// Register a missing repo from the transcript's cwd, named after its
    /// last path component.
    pub auto_add: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported {
        thread_id: String,
        repo: String,
        token: Token,
        added_repo: bool,
    },
    AlreadyImported {
        thread_id: String,
        token: Token,
    },
    WouldImport {
        thread_id: String,
        repo: String,
        add_repo: bool,
    },
    Skipped {
        thread_id: String,
        reason: String,
    },
}

impl std::fmt::Display for ImportOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imported {
                thread_id,
                repo,
                token,
                added_repo,
            } => {
                if *added_repo {
                    write!(f, "Added repo {repo}; ")?;
                }
                write!(f, "Imported {thread_id} -> repo {repo}, token {token}")
            }
            Self::AlreadyImported { thread_id, token } => {
                write!(f, "Already imported {thread_id} (token {token})")
            }
            Self::WouldImport {
                thread_id,
                repo,
                add_repo,
            } => {
                if *add_repo {
                    write!(f, "[dry-run] Would add repo {repo}; ")?;
                }
                write!(f, "[dry-run] Would import {thread_id} -> repo {repo}")
            }
            Self::Skipped { thread_id, reason } => write!(f, "Skipping {thread_id}: {reason}"),
        }
    }
}

/// Result of [`CodexSync::migrate_map`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateReport {
    /// Legacy keys moved (or, in a dry run, movable) onto a token.
    pub migrated: Vec<String>,
    /// Tokens whose record names a thread the map did not know about.
    pub seeded: usize,
    /// Legacy keys left in place because no session could be found or
    /// created for their thread.
    pub unresolved: Vec<String>,
}

enum RepoChoice {
    Registered(String),
    Add { name: String, path: PathBuf },
    Missing(String),
}

enum Resolution {
    Token(Token),
    WouldCreate,
    Unresolved,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sync
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CodexSync<'a> {
    store: &'a SessionStore,
    map: &'a RunnerSessionMap,
}

impl<'a> CodexSync<'a> {
    pub fn new(store: &'a SessionStore, map: &'a RunnerSessionMap) -> Self {
        Self { store, map }
    }

    /// Every transcript that identifies its thread.
    pub async fn list(&self) -> Vec<TranscriptMeta> {
        let source = self.store.conversations();
        let mut metas = Vec::new();
        for path in source.list_transcripts().await {
            if let Some(meta) = source.load_meta(&path).await {
                metas.push(meta);
            }
        }
        metas
    }

    /// Find a thread's transcript, by file name first and then by the id
    /// recorded inside it.
    pub async fn find(&self, thread_id: &str) -> Option<TranscriptMeta> {
        let source = self.store.conversations();
        if let Some(path) = source.find_transcript(thread_id).await {
            if let Some(meta) = source.load_meta(&path).await.filter(|m| m.id == thread_id) {
                return Some(meta);
            }
        }
        self.list().await.into_iter().find(|m| m.id == thread_id)
    }

    pub async fn import_all(&self, options: &ImportOptions) -> Result<Vec<ImportOutcome>> {
        let mut outcomes = Vec::new();
        for meta in self.list().await {
            outcomes.push(self.import(&meta, options).await?);
        }
        Ok(outcomes)
    }

    /// Create a codex session for one transcript and bind its thread in
    /// the continuation map.
    pub async fn import(
        &self,
        meta: &TranscriptMeta,
        options: &ImportOptions,
    ) -> Result<ImportOutcome> {
        let thread_id = meta.id.clone();
        if let Ok(Some(existing)) = self.store.get_session_by_id(&meta.id).await {
            return Ok(ImportOutcome::AlreadyImported {
                thread_id,
                token: existing.token,
            });
        }

        let (repo, add_path) = match self.resolve_repo(meta, options).await {
            RepoChoice::Registered(name) => (name, None),
            RepoChoice::Add { name, path } => (name, Some(path)),
            RepoChoice::Missing(reason) => return Ok(ImportOutcome::Skipped { thread_id, reason }),
        };

        if options.dry_run {
            return Ok(ImportOutcome::WouldImport {
                thread_id,
                repo,
                add_repo: add_path.is_some(),
            });
        }

        let added_repo = add_path.is_some();
        if let Some(path) = add_path {
            if let Err(e) = self.store.register_repo(&repo, &path).await {
                return Ok(ImportOutcome::Skipped {
                    thread_id,
                    reason: e.to_string(),
                });
            }
        }

        let notification = Notification {
            kind: Some("codex".into()),
            project: Some(repo.clone()),
            message: Some("Imported Codex session".into()),
            ..Notification::default()
        };
        let created = match self
            .store
            .create_session_with_id(&repo, Some(&meta.id), Channel::Codex, notification)
            .await
        {
            Ok(created) => created,
            Err(e) if e.is_conflict() || matches!(e, Error::InvalidInput(_)) => {
                return Ok(ImportOutcome::Skipped {
                    thread_id,
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let continuation = CodexContinuation {
            session_id: meta.id.clone(),
            model_provider: meta.model_provider.clone(),
            cli_version: meta.cli_version.clone(),
        };
        self.store
            .update_session(&repo, &created.session_id, move |record| {
                record.codex = Some(continuation);
            })
            .await?;

        let key = options
            .session_key
            .clone()
            .unwrap_or_else(|| created.token.to_string());
        self.map.set(&key, &meta.id).await?;

        TraceEvent::CodexSessionImported {
            thread_id: thread_id.clone(),
            repo_name: repo.clone(),
            token: created.token.to_string(),
            added_repo,
        }
        .emit();

        Ok(ImportOutcome::Imported {
            thread_id,
            repo,
            token: created.token,
            added_repo,
        })
    }

    /// Move legacy chat-keyed continuations onto session tokens, then add a
    /// map entry for every imported record whose token has none.
    pub async fn migrate_map(&self, options: &ImportOptions) -> Result<MigrateReport> {
        let mut report = MigrateReport::default();
        let mut claimed: Vec<Token> = Vec::new();

        for (key, thread_id) in self.map.entries().await {
            if !LEGACY_KEY_PREFIXES.iter().any(|p| key.starts_with(p)) {
                continue;
            }
            match self.resolve_legacy(&key, &thread_id, options).await? {
                Resolution::Token(token) => {
                    if !options.dry_run {
                        self.map.rekey(&key, token.as_str()).await?;
                    }
                    claimed.push(token);
                    report.migrated.push(key);
                }
                Resolution::WouldCreate => report.migrated.push(key),
                Resolution::Unresolved => report.unresolved.push(key),
            }
        }

        for (token, _) in self.store.list_tokens(None).await {
            if claimed.contains(&token) || self.map.has(token.as_str()).await {
                continue;
            }
            let Ok(Some(record)) = self.store.find_session_by_token(token.as_str()).await else {
                continue;
            };
            let Some(codex) = record.codex else {
                continue;
            };
            if !options.dry_run {
                self.map.set(token.as_str(), &codex.session_id).await?;
            }
            report.seeded += 1;
        }

        if !options.dry_run {
            TraceEvent::ContinuationMapMigrated {
                migrated: report.migrated.len(),
                seeded: report.seeded,
                unresolved: report.unresolved.len(),
            }
            .emit();
        }
        Ok(report)
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn resolve_repo(&self, meta: &TranscriptMeta, options: &ImportOptions) -> RepoChoice {
        if let Some(name) = &options.repo {
            return match self.store.repo(name).await {
                Some(repo) => RepoChoice::Registered(repo.name),
                None => RepoChoice::Missing(format!("repo not registered: {name}")),
            };
        }
        let Some(cwd) = &meta.cwd else {
            return RepoChoice::Missing("transcript records no working directory".into());
        };
        if let Some(repo) = self.store.repo_by_workdir(cwd).await {
            return RepoChoice::Registered(repo.name);
        }
        if !options.auto_add {
            return RepoChoice::Missing(format!("no repo registered for {}", cwd.display()));
        }
        match cwd.file_name().map(|n| n.to_string_lossy().into_owned()) {
            Some(name) if !name.is_empty() => RepoChoice::Add {
                name,
                path: cwd.clone(),
            },
            _ => RepoChoice::Missing(format!("cannot name a repo after {}", cwd.display())),
        }
    }

    /// Token a legacy key should move to.  `email:<sessionId>` keys name
    /// their session directly; otherwise the thread's own session is used,
    /// imported from its transcript when needed.
    async fn resolve_legacy(
        &self,
        key: &str,
        thread_id: &str,
        options: &ImportOptions,
    ) -> Result<Resolution> {
        if let Some(session_id) = key.strip_prefix("email:") {
            if let Ok(Some(record)) = self.store.get_session_by_id(session_id).await {
                return Ok(Resolution::Token(record.token));
            }
        }
        if let Ok(Some(record)) = self.store.get_session_by_id(thread_id).await {
            return Ok(Resolution::Token(record.token));
        }
        let Some(meta) = self.find(thread_id).await else {
            return Ok(Resolution::Unresolved);
        };
        let import = ImportOptions {
            repo: None,
            session_key: None,
            auto_add: options.auto_add,
            dry_run: options.dry_run,
        };
        Ok(match self.import(&meta, &import).await? {
            ImportOutcome::Imported { token, .. } | ImportOutcome::AlreadyImported { token, .. } => {
                Resolution::Token(token)
            }
            ImportOutcome::WouldImport { .. } => Resolution::WouldCreate,
            ImportOutcome::Skipped { thread_id, reason } => {
                tracing::warn!(key, thread_id = %thread_id, reason = %reason, "legacy continuation left in place");
                Resolution::Unresolved
            }
        })
    }
}
