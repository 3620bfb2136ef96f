//! Session store facade.
//!
//! The only writer of the repo registry, the token directory, the session
//! index and the per-repo session records.  Every file is replaced
//! atomically (temp file + rename).  The three writes of a save are not a
//! transaction: a crash between them leaves the derived indexes behind the
//! record files, which [`SessionStore::reindex_sessions`] repairs.
//!
//! Index read-modify-write sequences are serialised by an async mutex, so
//! tasks sharing one store never lose each other's index updates.  Separate
//! processes writing the same root can still race; the later write wins.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use cr_domain::error::{Error, Result};
use cr_domain::persist::{read_json, read_json_or_default, write_json_atomic};
use cr_domain::trace::TraceEvent;
use cr_domain::Token;

use crate::conversation::ConversationSource;
use crate::index::{SessionIndex, TokenDirectory, TokenEntry};
use crate::layout::{StoreLayout, RECORD_EXT};
use crate::record::{Channel, Notification, SessionRecord, Stamp};
use crate::repos::{Repo, RepoRegistry};
use crate::token_gen::{RandomTokenGenerator, TokenGenerator};

/// Upper bound on collision retries for a single token draw.
const MAX_TOKEN_ATTEMPTS: u32 = 1024;

/// Result of creating a new session.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub token: Token,
    pub session_id: String,
    pub path: PathBuf,
}

/// Summary of a reindex pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub repos: usize,
    pub sessions: usize,
    pub skipped: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionStore {
    layout: StoreLayout,
    repos: RepoRegistry,
    token_gen: Box<dyn TokenGenerator>,
    pub(crate) conversations: ConversationSource,
    write_lock: Mutex<()>,
}

impl SessionStore {
    /// Open (lazily) the session directory rooted at `root`.  Nothing is
    /// created on disk until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let layout = StoreLayout::new(root);
        let repos = RepoRegistry::new(layout.repos_path());
        tracing::debug!(root = %layout.root().display(), "session store opened");
        Self {
            layout,
            repos,
            token_gen: Box::new(RandomTokenGenerator),
            conversations: ConversationSource::disabled(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_token_generator(mut self, generator: impl TokenGenerator + 'static) -> Self {
        self.token_gen = Box::new(generator);
        self
    }

    pub fn with_conversations(mut self, conversations: ConversationSource) -> Self {
        self.conversations = conversations;
        self
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn conversations(&self) -> &ConversationSource {
        &self.conversations
    }

    // ── Repos ───────────────────────────────────────────────────────

    pub async fn register_repo(&self, name: &str, path: &Path) -> Result<Repo> {
        let _guard = self.write_lock.lock().await;
        self.repos.add(name, path).await
    }

    /// Remove a repo from the registry.  Its session files are left in
    /// place; lookups through their tokens report a configuration error
    /// until the repo is registered again.
    pub async fn deregister_repo(&self, name: &str) -> Result<Repo> {
        let _guard = self.write_lock.lock().await;
        self.repos.remove(name).await
    }

    pub async fn list_repos(&self) -> Vec<Repo> {
        self.repos.list().await
    }

    pub async fn repo(&self, name: &str) -> Option<Repo> {
        self.repos.get(name).await
    }

    pub async fn repo_by_workdir(&self, workdir: &Path) -> Option<Repo> {
        self.repos.find_by_workdir(workdir).await
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Persist `record` under `repo_name` and bind its token and id in the
    /// derived indexes.  Fails with `Conflict` when the token already belongs
    /// to another session; re-saving an unchanged record is a no-op.
    pub async fn save_session(&self, repo_name: &str, record: &SessionRecord) -> Result<PathBuf> {
        let _guard = self.write_lock.lock().await;
        self.save_locked(repo_name, record).await
    }

    /// Load a record, apply `mutate`, stamp `updatedAt`, and save it back.
    pub async fn update_session<F>(
        &self,
        repo_name: &str,
        session_id: &str,
        mutate: F,
    ) -> Result<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .load_record(repo_name, session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {session_id} in repo {repo_name}")))?;
        mutate(&mut record);
        record.updated_at = Some(Stamp::now());
        self.save_locked(repo_name, &record).await?;
        Ok(record)
    }

    /// Create a session for `repo_name` with a freshly generated token.
    pub async fn create_session(
        &self,
        repo_name: &str,
        channel: Channel,
        notification: Notification,
    ) -> Result<CreatedSession> {
        self.create_session_with_id(repo_name, None, channel, notification)
            .await
    }

    /// Like [`create_session`](Self::create_session), but keeps an
    /// externally issued session id.  An id already present in the session
    /// index is a conflict.
    pub async fn create_session_with_id(
        &self,
        repo_name: &str,
        session_id: Option<&str>,
        channel: Channel,
        notification: Notification,
    ) -> Result<CreatedSession> {
        let _guard = self.write_lock.lock().await;
        let repo = self.require_repo(repo_name).await?;

        let session_id = match session_id {
            Some(id) => {
                self.layout.session_path(repo_name, id)?;
                let index: SessionIndex =
                    read_json_or_default(&self.layout.sessions_index_path()).await;
                if let Some(existing) = index.get(id) {
                    return Err(Error::Conflict(format!(
                        "session {id} already exists in repo {}",
                        existing.repo_name
                    )));
                }
                id.to_owned()
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let live: TokenDirectory = read_json_or_default(&self.layout.tokens_path()).await;
        let token = self.generate_unique_token(&live)?;

        let record = SessionRecord::new(
            session_id.clone(),
            token.clone(),
            repo_name,
            repo.path,
            channel,
            notification,
        );
        let path = self.save_locked(repo_name, &record).await?;

        Ok(CreatedSession {
            token,
            session_id,
            path,
        })
    }

    /// Create a minimal manual session, e.g. from the CLI.
    pub async fn create_manual_session(&self, repo_name: &str) -> Result<CreatedSession> {
        self.create_session(repo_name, Channel::Manual, Notification::manual(repo_name))
            .await
    }

    /// Delete a session record and scrub every index reference to it.
    /// Returns whether a record file was actually deleted.
    pub async fn remove_session(&self, repo_name: &str, session_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.layout.session_path(repo_name, session_id)?;

        let file_deleted = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        let mut tokens: TokenDirectory = read_json_or_default(&self.layout.tokens_path()).await;
        let mut index: SessionIndex = read_json_or_default(&self.layout.sessions_index_path()).await;
        let tokens_scrubbed = tokens.scrub_session(session_id);
        index.remove(session_id);

        write_json_atomic(&self.layout.tokens_path(), &tokens).await?;
        write_json_atomic(&self.layout.sessions_index_path(), &index).await?;

        TraceEvent::SessionRemoved {
            repo_name: repo_name.to_owned(),
            session_id: session_id.to_owned(),
            file_deleted,
            tokens_scrubbed,
        }
        .emit();

        Ok(file_deleted)
    }

    /// Rebuild the token directory and session index from the record files
    /// of every registered repo, overwriting both index files.
    pub async fn reindex_sessions(&self) -> Result<ReindexReport> {
        let _guard = self.write_lock.lock().await;
        let mut tokens = TokenDirectory::default();
        let mut index = SessionIndex::default();
        let mut report = ReindexReport::default();

        for repo in self.repos.list().await {
            report.repos += 1;
            let dir = match self.layout.repo_sessions_dir(&repo.name) {
                Ok(dir) => dir,
                Err(e) => {
                    tracing::warn!(repo = %repo.name, error = %e, "skipping repo during reindex");
                    continue;
                }
            };
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                    continue;
                }
                let Some(record) = read_json::<SessionRecord>(&path).await else {
                    tracing::warn!(path = %path.display(), "failed to reindex session file");
                    report.skipped += 1;
                    continue;
                };
                if record.id.trim().is_empty() {
                    report.skipped += 1;
                    continue;
                }
                tokens.tokens.insert(
                    record.token.clone(),
                    TokenEntry {
                        repo_name: repo.name.clone(),
                        session_id: record.id.clone(),
                    },
                );
                index.insert(record.id, repo.name.clone());
                report.sessions += 1;
            }
        }

        write_json_atomic(&self.layout.tokens_path(), &tokens).await?;
        write_json_atomic(&self.layout.sessions_index_path(), &index).await?;

        TraceEvent::SessionsReindexed {
            repos: report.repos,
            sessions: report.sessions,
            skipped: report.skipped,
        }
        .emit();

        Ok(report)
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Resolve a human-typed token.  Unknown or malformed tokens yield
    /// `Ok(None)`; a token whose repo has been deregistered is a
    /// configuration error.
    pub async fn find_session_by_token(&self, raw: &str) -> Result<Option<SessionRecord>> {
        let Ok(token) = Token::parse(raw) else {
            return Ok(None);
        };
        let tokens: TokenDirectory = read_json_or_default(&self.layout.tokens_path()).await;
        let Some(entry) = tokens.get(&token) else {
            return Ok(None);
        };
        self.hydrate(&entry.repo_name, &entry.session_id).await
    }

    /// Resolve a session id through the session index.
    pub async fn get_session_by_id(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let index: SessionIndex = read_json_or_default(&self.layout.sessions_index_path()).await;
        let Some(entry) = index.get(session_id) else {
            return Ok(None);
        };
        self.hydrate(&entry.repo_name, session_id).await
    }

    /// Token directory entries, optionally restricted to one repo.
    pub async fn list_tokens(&self, repo_name: Option<&str>) -> Vec<(Token, TokenEntry)> {
        let tokens: TokenDirectory = read_json_or_default(&self.layout.tokens_path()).await;
        tokens
            .iter_repo(repo_name)
            .map(|(t, e)| (t.clone(), e.clone()))
            .collect()
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn save_locked(&self, repo_name: &str, record: &SessionRecord) -> Result<PathBuf> {
        let repo = self.require_repo(repo_name).await?;
        if record.id.trim().is_empty() {
            return Err(Error::InvalidInput("session must include id and token".into()));
        }
        let path = self.layout.session_path(repo_name, &record.id)?;

        let mut tokens: TokenDirectory = read_json_or_default(&self.layout.tokens_path()).await;
        let mut index: SessionIndex = read_json_or_default(&self.layout.sessions_index_path()).await;

        tokens.bind(
            record.token.clone(),
            TokenEntry {
                repo_name: repo_name.to_owned(),
                session_id: record.id.clone(),
            },
        )?;
        index.insert(record.id.clone(), repo_name);

        let mut payload = record.clone();
        payload.project = repo_name.to_owned();
        if payload.workdir.as_os_str().is_empty() {
            payload.workdir = repo.path;
        }

        write_json_atomic(&path, &payload).await?;
        write_json_atomic(&self.layout.tokens_path(), &tokens).await?;
        write_json_atomic(&self.layout.sessions_index_path(), &index).await?;

        TraceEvent::SessionSaved {
            repo_name: repo_name.to_owned(),
            session_id: record.id.clone(),
            token: record.token.to_string(),
        }
        .emit();

        Ok(path)
    }

    async fn require_repo(&self, repo_name: &str) -> Result<Repo> {
        self.repos
            .get(repo_name)
            .await
            .ok_or_else(|| Error::NotFound(format!("repo not registered: {repo_name}")))
    }

    pub(crate) async fn load_record(
        &self,
        repo_name: &str,
        session_id: &str,
    ) -> Result<Option<SessionRecord>> {
        let path = match self.layout.session_path(repo_name, session_id) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(repo = repo_name, session_id, error = %e, "ignoring malformed index entry");
                return Ok(None);
            }
        };
        Ok(read_json(&path).await)
    }

    async fn hydrate(&self, repo_name: &str, session_id: &str) -> Result<Option<SessionRecord>> {
        let Some(mut record) = self.load_record(repo_name, session_id).await? else {
            return Ok(None);
        };
        let repo = self.repos.get(repo_name).await.ok_or_else(|| {
            Error::Configuration(format!(
                "repo not registered: {repo_name} (referenced by session {session_id})"
            ))
        })?;
        record.project = repo.name;
        record.workdir = repo.path;
        Ok(Some(record))
    }

    fn generate_unique_token(&self, live: &TokenDirectory) -> Result<Token> {
        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let token = self.token_gen.generate();
            if !live.contains(&token) {
                TraceEvent::TokenGenerated {
                    token: token.to_string(),
                    attempts: attempt,
                }
                .emit();
                return Ok(token);
            }
        }
        Err(Error::Conflict(format!(
            "no free token after {MAX_TOKEN_ATTEMPTS} attempts"
        )))
    }
}
