//! Session records — the per-repo source of truth.
//!
//! Every record shares a common core (`id`, `token`, `project`, `created`,
//! `workdir`) and carries a channel-specific extension selected by its `type`
//! field.  Reading is forgiving: anything but `id` and `token` may be absent.  Records are stored as `<root>/<repo>/sessions/<id>.json`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cr_domain::Token;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredRecord")]
pub struct SessionRecord {
    pub id: String,
    pub token: Token,
    #[serde(flatten)]
    pub channel: Channel,
    pub created: DateTime<Utc>,
    /// Unix seconds, mirrors `created`.
    pub created_at: i64,
    /// Hydrated from the repo registry on every lookup.
    pub workdir: PathBuf,
    /// Name of the owning repo.
    pub project: String,
    #[serde(default)]
    pub notification: Notification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_session: Option<String>,
    /// Continuation metadata attached once an external tool has issued an id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex: Option<CodexContinuation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_access: Option<Stamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_command: Option<Stamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Stamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<Stamp>,
}

impl SessionRecord {
    /// Build a fresh record stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        token: Token,
        repo_name: impl Into<String>,
        workdir: impl Into<PathBuf>,
        channel: Channel,
        notification: Notification,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            token,
            channel,
            created: now,
            created_at: now.timestamp(),
            workdir: workdir.into(),
            project: repo_name.into(),
            notification,
            tmux_session: None,
            codex: None,
            last_access: None,
            last_command: None,
            updated_at: None,
            updated: None,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.channel.kind()
    }

    /// Best explicit activity timestamp, in epoch milliseconds.
    ///
    /// Checks the access/command/update stamps first and falls back to the
    /// creation time.  File modification time is the caller's concern.
    pub fn activity_millis(&self) -> Option<i64> {
        [
            &self.last_access,
            &self.last_command,
            &self.updated_at,
            &self.updated,
        ]
        .into_iter()
        .flatten()
        .find_map(Stamp::to_millis)
        .or_else(|| Some(self.created.timestamp_millis()).filter(|ms| *ms > 0))
        .or_else(|| Stamp::Epoch(self.created_at).to_millis())
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_access = Some(Stamp::now());
    }
}

// ── On-disk form ────────────────────────────────────────────────

/// Record as read from disk.  Only `id` and `token` are mandatory; files
/// written by older tools may lack the type tag, `createdAt`, or use
/// `repoName` instead of `project`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    id: String,
    token: Token,
    #[serde(rename = "type", default)]
    kind: Option<ChannelKind>,
    #[serde(default)]
    chat_id: Option<StringOrNumber>,
    #[serde(default)]
    user_id: Option<StringOrNumber>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    workdir: PathBuf,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    repo_name: Option<String>,
    #[serde(default)]
    notification: Notification,
    #[serde(default)]
    tmux_session: Option<String>,
    #[serde(default)]
    codex: Option<CodexContinuation>,
    #[serde(default)]
    last_access: Option<Stamp>,
    #[serde(default)]
    last_command: Option<Stamp>,
    #[serde(default)]
    updated_at: Option<Stamp>,
    #[serde(default)]
    updated: Option<Stamp>,
}

/// Chat ids arrive as numbers from some channels.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Number(i64),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::Text(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }
}

impl From<StoredRecord> for SessionRecord {
    fn from(raw: StoredRecord) -> Self {
        let chat = || ChatOrigin {
            chat_id: raw.chat_id.map(String::from),
            user_id: raw.user_id.map(String::from),
        };
        let channel = match raw.kind.unwrap_or(ChannelKind::Manual) {
            ChannelKind::Telegram => Channel::Telegram(chat()),
            ChannelKind::Line => Channel::Line(chat()),
            ChannelKind::Codex => Channel::Codex,
            ChannelKind::Manual => Channel::Manual,
            ChannelKind::Email => Channel::Email(EmailOrigin {
                message_id: raw.message_id,
                from: raw.from,
            }),
        };

        let created = raw
            .created
            .or_else(|| {
                raw.created_at
                    .and_then(|secs| Stamp::Epoch(secs).to_millis())
                    .and_then(DateTime::from_timestamp_millis)
            })
            .unwrap_or_default();
        let created_at = raw
            .created_at
            .filter(|secs| *secs > 0)
            .unwrap_or_else(|| created.timestamp());

        Self {
            id: raw.id,
            token: raw.token,
            channel,
            created,
            created_at,
            workdir: raw.workdir,
            project: raw.project.or(raw.repo_name).unwrap_or_default(),
            notification: raw.notification,
            tmux_session: raw.tmux_session,
            codex: raw.codex,
            last_access: raw.last_access,
            last_command: raw.last_command,
            updated_at: raw.updated_at,
            updated: raw.updated,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel extension
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Channel-specific payload, keyed by the record's `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Channel {
    Telegram(ChatOrigin),
    Line(ChatOrigin),
    Codex,
    Manual,
    Email(EmailOrigin),
}

impl Channel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Telegram(_) => ChannelKind::Telegram,
            Self::Line(_) => ChannelKind::Line,
            Self::Codex => ChannelKind::Codex,
            Self::Manual => ChannelKind::Manual,
            Self::Email(_) => ChannelKind::Email,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Telegram,
    Line,
    Codex,
    Manual,
    Email,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Telegram => "telegram",
            Self::Line => "line",
            Self::Codex => "codex",
            Self::Manual => "manual",
            Self::Email => "email",
        };
        f.write_str(s)
    }
}

/// Chat identity for messaging channels.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOrigin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailOrigin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Notification payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The notification that created the session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: NotificationMetadata,
}

impl Notification {
    pub fn manual(repo_name: &str) -> Self {
        Self {
            kind: Some("manual".into()),
            project: Some(repo_name.to_owned()),
            message: Some("Manual session".into()),
            metadata: NotificationMetadata::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_question: Option<String>,
    #[serde(default, alias = "claudeResponse", skip_serializing_if = "Option::is_none")]
    pub assistant_response: Option<String>,
}

/// Continuation identity issued by the external coding tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodexContinuation {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_version: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timestamps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A timestamp as found in hand-edited or foreign-written records: either
/// epoch seconds/milliseconds or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stamp {
    Epoch(i64),
    Text(String),
}

impl Stamp {
    pub fn now() -> Self {
        Self::Text(Utc::now().to_rfc3339())
    }

    /// Epoch milliseconds.  Values below 10^12 are read as seconds.
    pub fn to_millis(&self) -> Option<i64> {
        match self {
            Self::Epoch(v) if *v <= 0 => None,
            Self::Epoch(v) if *v < 1_000_000_000_000 => Some(v * 1000),
            Self::Epoch(v) => Some(*v),
            Self::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.timestamp_millis()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token() -> Token {
        Token::parse("ABCD1234").unwrap()
    }

    #[test]
    fn manual_record_serializes_type_tag() {
        let record = SessionRecord::new(
            "s-1",
            token(),
            "demo",
            "/tmp/demo",
            Channel::Manual,
            Notification::manual("demo"),
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "manual");
        assert_eq!(value["token"], "ABCD1234");
        assert_eq!(value["project"], "demo");
        assert_eq!(value["notification"]["type"], "manual");
        assert!(value.get("codex").is_none());
    }

    #[test]
    fn telegram_record_reads_channel_fields() {
        let value = json!({
            "id": "s-2",
            "token": "zzzz9999",
            "type": "telegram",
            "chatId": "42",
            "created": "2026-01-05T10:00:00Z",
            "createdAt": 1767607200,
            "workdir": "/srv/app",
            "repoName": "app",
            "notification": {"message": "done", "metadata": {"claudeResponse": "all good"}},
            "codex": {"sessionId": "c-9", "modelProvider": "openai"}
        });
        let record: SessionRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.token.as_str(), "ZZZZ9999");
        assert_eq!(record.project, "app");
        assert_eq!(
            record.channel,
            Channel::Telegram(ChatOrigin {
                chat_id: Some("42".into()),
                user_id: None
            })
        );
        assert_eq!(
            record.notification.metadata.assistant_response.as_deref(),
            Some("all good")
        );
        assert_eq!(record.codex.unwrap().session_id, "c-9");
    }

    #[test]
    fn stamp_normalizes_seconds_and_millis() {
        assert_eq!(Stamp::Epoch(1_700_000_000).to_millis(), Some(1_700_000_000_000));
        assert_eq!(Stamp::Epoch(1_700_000_000_123).to_millis(), Some(1_700_000_000_123));
        assert_eq!(Stamp::Epoch(0).to_millis(), None);
        assert_eq!(
            Stamp::Text("1970-01-01T00:00:01Z".into()).to_millis(),
            Some(1000)
        );
        assert_eq!(Stamp::Text("yesterday".into()).to_millis(), None);
    }

    #[test]
    fn activity_prefers_explicit_access() {
        let mut record = SessionRecord::new(
            "s-3",
            token(),
            "demo",
            "/tmp/demo",
            Channel::Manual,
            Notification::default(),
        );
        record.updated_at = Some(Stamp::Epoch(2_000_000_000));
        record.last_access = Some(Stamp::Text("garbage".into()));
        assert_eq!(record.activity_millis(), Some(2_000_000_000_000));

        record.last_access = Some(Stamp::Epoch(2_100_000_000));
        assert_eq!(record.activity_millis(), Some(2_100_000_000_000));
    }

    #[test]
    fn minimal_record_fills_missing_fields() {
        let value = json!({
            "id": "s-1",
            "token": "ABC12345",
            "type": "telegram",
            "chatId": 12345,
            "created": "2026-01-01T00:00:00Z",
            "workdir": "/x",
            "repoName": "demo"
        });
        let record: SessionRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.project, "demo");
        assert_eq!(record.created_at, 1_767_225_600);
        assert_eq!(
            record.channel,
            Channel::Telegram(ChatOrigin {
                chat_id: Some("12345".into()),
                user_id: None
            })
        );

        let bare: SessionRecord =
            serde_json::from_value(json!({"id": "s-2", "token": "ABC12345", "createdAt": 1_700_000_000}))
                .unwrap();
        assert_eq!(bare.kind(), ChannelKind::Manual);
        assert_eq!(bare.created.timestamp(), 1_700_000_000);
        assert_eq!(bare.project, "");
    }
}
