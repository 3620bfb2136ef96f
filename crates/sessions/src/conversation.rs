//! Conversation summaries for session listings.
//!
//! The external coding tool writes one `*.jsonl` transcript per thread under
//! its sessions directory, with the thread id somewhere in the file name.
//! Only `response_item` events carrying a `message` payload are considered
//! for summaries; the `session_meta` event identifies the thread itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::record::SessionRecord;

/// First and latest meaningful message of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    pub initial_message: Option<String>,
    pub last_message: Option<String>,
}

impl Conversation {
    pub fn is_empty(&self) -> bool {
        self.initial_message.is_none() && self.last_message.is_none()
    }

    /// Case-insensitive substring match on either message.
    pub fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        [&self.initial_message, &self.last_message]
            .into_iter()
            .flatten()
            .any(|m| m.to_lowercase().contains(&needle))
    }
}

/// A resolved conversation plus the transcript it came from, if any.
#[derive(Debug, Clone, Default)]
pub struct ConversationView {
    pub conversation: Conversation,
    pub transcript: Option<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct TranscriptLine {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Deserialize)]
struct MessagePayload {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Vec<serde_json::Value>,
}

fn content_text(content: &[serde_json::Value]) -> String {
    let parts: Vec<&str> = content
        .iter()
        .filter_map(|item| {
            ["text", "input_text", "output_text"]
                .iter()
                .find_map(|key| item.get(key).and_then(|v| v.as_str()))
        })
        .collect();
    parts.join(" ").trim().to_owned()
}

fn looks_like_instructions(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let compact: String = lowered.chars().filter(|c| !c.is_whitespace()).collect();
    compact.contains("<instructions>")
        || lowered.contains("agents.md instructions")
        || compact.contains("<environment_context>")
}

fn looks_like_slash_command(text: &str) -> bool {
    text.trim_start().starts_with('/')
}

/// Summarise a transcript.  Unparseable lines are skipped.
///
/// The initial message is the first genuine user prompt.  The last message
/// prefers the latest genuine user prompt, then the latest non-preamble
/// message of any role, then whatever came last.
pub fn extract_conversation(jsonl: &str) -> Conversation {
    let mut first_user = None;
    let mut last_user = None;
    let mut last_plain = None;
    let mut last_any = None;

    for line in jsonl.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(entry) = serde_json::from_str::<TranscriptLine>(line) else {
            continue;
        };
        if entry.kind != "response_item" {
            continue;
        }
        let Some(payload) = entry.payload.filter(|p| p.kind == "message") else {
            continue;
        };
        let text = content_text(&payload.content);
        if text.is_empty() {
            continue;
        }

        let preamble = looks_like_instructions(&text);
        if payload.role == "user" && !preamble && !looks_like_slash_command(&text) {
            if first_user.is_none() {
                first_user = Some(text.clone());
            }
            last_user = Some(text.clone());
        }
        if !preamble {
            last_plain = Some(text.clone());
        }
        last_any = Some(text);
    }

    Conversation {
        initial_message: first_user,
        last_message: last_user.or(last_plain).or(last_any),
    }
}

// ── Session metadata ────────────────────────────────────────────

/// Identity of an external thread, from its transcript's `session_meta`
/// event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptMeta {
    pub id: String,
    pub cwd: Option<PathBuf>,
    pub timestamp: Option<String>,
    pub model_provider: Option<String>,
    pub cli_version: Option<String>,
    pub path: PathBuf,
}

#[derive(Deserialize)]
struct MetaLine {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<MetaPayload>,
}

#[derive(Deserialize)]
struct MetaPayload {
    #[serde(default)]
    id: String,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    model_provider: Option<String>,
    #[serde(default)]
    cli_version: Option<String>,
}

/// First `session_meta` event with a non-empty id.
pub fn extract_session_meta(jsonl: &str, path: &Path) -> Option<TranscriptMeta> {
    jsonl
        .lines()
        .filter(|l| l.trim_start().starts_with('{'))
        .filter_map(|l| serde_json::from_str::<MetaLine>(l).ok())
        .filter(|line| line.kind == "session_meta")
        .filter_map(|line| line.payload)
        .find(|meta| !meta.id.trim().is_empty())
        .map(|meta| TranscriptMeta {
            id: meta.id,
            cwd: meta.cwd.filter(|p| !p.as_os_str().is_empty()),
            timestamp: meta.timestamp,
            model_provider: meta.model_provider,
            cli_version: meta.cli_version,
            path: path.to_path_buf(),
        })
}

/// Fallback summary taken from the notification that created the session.
pub fn notification_conversation(record: &SessionRecord) -> Conversation {
    let n = &record.notification;
    let initial = [
        &n.metadata.user_question,
        &n.message,
        &n.metadata.assistant_response,
    ]
    .into_iter()
    .flatten()
    .find(|t| !t.trim().is_empty())
    .cloned();
    Conversation {
        initial_message: initial,
        last_message: None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript source
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CachedConversation {
    modified: Option<SystemTime>,
    conversation: Conversation,
}

/// Finds and summarises transcripts, caching each summary until the file's
/// modification time changes.
pub struct ConversationSource {
    root: Option<PathBuf>,
    cache: Mutex<HashMap<PathBuf, CachedConversation>>,
}

impl ConversationSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// A source that never finds transcripts; listings use notification
    /// text only.
    pub fn disabled() -> Self {
        Self {
            root: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Every `*.jsonl` transcript under the sessions directory, sorted by
    /// path.
    pub async fn list_transcripts(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        self.walk(|path| {
            found.push(path.to_path_buf());
            false
        })
        .await;
        found.sort();
        found
    }

    /// Locate the transcript whose file name contains `thread_id`.
    pub async fn find_transcript(&self, thread_id: &str) -> Option<PathBuf> {
        if thread_id.is_empty() {
            return None;
        }
        let mut hit = None;
        self.walk(|path| {
            let matched = path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().contains(thread_id));
            if matched {
                hit = Some(path.to_path_buf());
            }
            matched
        })
        .await;
        hit
    }

    /// Read the thread identity recorded in one transcript.
    pub async fn load_meta(&self, path: &Path) -> Option<TranscriptMeta> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => extract_session_meta(&raw, path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read transcript");
                None
            }
        }
    }

    /// Visit transcript files depth-first until `visit` returns true.
    async fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(&Path) -> bool,
    {
        let Some(root) = self.root.as_ref() else {
            return;
        };
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                let path = entry.path();
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && path.extension().is_some_and(|ext| ext == "jsonl")
                    && visit(&path)
                {
                    return;
                }
            }
        }
    }

    /// Summarise one transcript file, reusing the cached summary while the
    /// file is unchanged.
    pub async fn load(&self, path: &Path) -> Conversation {
        let modified = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .ok();
        if let Some(cached) = self.cache.lock().get(path) {
            if cached.modified == modified {
                return cached.conversation.clone();
            }
        }

        let conversation = match tokio::fs::read_to_string(path).await {
            Ok(raw) => extract_conversation(&raw),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read transcript");
                Conversation::default()
            }
        };
        self.cache.lock().insert(
            path.to_path_buf(),
            CachedConversation {
                modified,
                conversation: conversation.clone(),
            },
        );
        conversation
    }

    /// Conversation for a session: the external transcript when one exists
    /// and says something, else the notification text.
    pub async fn for_record(&self, record: &SessionRecord) -> ConversationView {
        let mut transcript = None;
        if let Some(codex) = &record.codex {
            if let Some(path) = self.find_transcript(&codex.session_id).await {
                let conversation = self.load(&path).await;
                if !conversation.is_empty() {
                    return ConversationView {
                        conversation,
                        transcript: Some(path),
                    };
                }
                transcript = Some(path);
            }
        }
        ConversationView {
            conversation: notification_conversation(record),
            transcript,
        }
    }
}
