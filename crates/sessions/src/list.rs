//! Read-only session listing.
//!
//! Joins the token directory with the per-repo records and their
//! conversation summaries.  Best effort: a missing record still lists its
//! token, and nothing here writes.

use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use cr_domain::persist::read_json_or_default;
use cr_domain::Token;

use crate::conversation::{Conversation, ConversationView};
use crate::index::TokenDirectory;
use crate::record::SessionRecord;
use crate::store::SessionStore;

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub repo_name: Option<String>,
    /// Case-insensitive substring matched against the conversation.
    pub filter: Option<String>,
    /// `None` lists everything.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SessionListing {
    pub token: Token,
    pub repo_name: String,
    pub session_id: String,
    pub record: Option<SessionRecord>,
    /// Epoch milliseconds, 0 when nothing better is known.
    pub last_access_ms: i64,
    /// Transcript if one was found, else the record file.
    pub source_path: Option<PathBuf>,
    pub conversation: Conversation,
}

impl SessionStore {
    /// Sessions sorted by last access, newest first.
    pub async fn list_sessions(&self, options: &ListOptions) -> Vec<SessionListing> {
        let tokens: TokenDirectory = read_json_or_default(&self.layout().tokens_path()).await;
        let filter = options
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty());

        let mut listings = Vec::new();
        for (token, entry) in tokens.iter_repo(options.repo_name.as_deref()) {
            let record = self
                .load_record(&entry.repo_name, &entry.session_id)
                .await
                .ok()
                .flatten();
            let record_path = record.as_ref().and_then(|_| {
                self.layout()
                    .session_path(&entry.repo_name, &entry.session_id)
                    .ok()
            });

            let view = match &record {
                Some(record) => self.conversations.for_record(record).await,
                None => ConversationView::default(),
            };
            if let Some(needle) = filter {
                if !view.conversation.matches(needle) {
                    continue;
                }
            }

            let source_path = view.transcript.or(record_path);
            let last_access_ms = match record.as_ref().and_then(SessionRecord::activity_millis) {
                Some(ms) => ms,
                None => modified_millis(source_path.as_deref()).await.unwrap_or(0),
            };

            listings.push(SessionListing {
                token: token.clone(),
                repo_name: entry.repo_name.clone(),
                session_id: entry.session_id.clone(),
                record,
                last_access_ms,
                source_path,
                conversation: view.conversation,
            });
        }

        listings.sort_by(|a, b| b.last_access_ms.cmp(&a.last_access_ms));
        if let Some(limit) = options.limit {
            listings.truncate(limit);
        }
        listings
    }
}

async fn modified_millis(path: Option<&std::path::Path>) -> Option<i64> {
    let meta = tokio::fs::metadata(path?).await.ok()?;
    let since = meta.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(since.as_millis()).ok()
}
