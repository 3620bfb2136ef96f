//! Derived lookup indexes over the session records.
//!
//! Both indexes are rebuildable from the per-repo record files; see
//! [`SessionStore::reindex_sessions`](crate::SessionStore::reindex_sessions).

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use cr_domain::error::{Error, Result};
use cr_domain::Token;

/// `tokens.json`: token → owning repo and session id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenDirectory {
    #[serde(default, deserialize_with = "lenient_entries")]
    pub tokens: BTreeMap<Token, TokenEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEntry {
    pub repo_name: String,
    pub session_id: String,
}

impl TokenDirectory {
    pub fn get(&self, token: &Token) -> Option<&TokenEntry> {
        self.tokens.get(token)
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.tokens.contains_key(token)
    }

    /// Bind `token` to `entry`.  Rebinding a token to the same session is a
    /// no-op; binding it to a different session is a conflict.  Any other
    /// token previously bound to the same session is released.
    pub fn bind(&mut self, token: Token, entry: TokenEntry) -> Result<()> {
        if let Some(existing) = self.tokens.get(&token) {
            if existing.session_id != entry.session_id {
                return Err(Error::Conflict(format!(
                    "token {token} is already bound to session {}",
                    existing.session_id
                )));
            }
        }
        self.tokens
            .retain(|t, e| *t == token || e.session_id != entry.session_id);
        self.tokens.insert(token, entry);
        Ok(())
    }

    /// Remove every token pointing at `session_id`.  Returns how many were
    /// removed.
    pub fn scrub_session(&mut self, session_id: &str) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, e| e.session_id != session_id);
        before - self.tokens.len()
    }

    pub fn iter_repo<'a>(
        &'a self,
        repo_name: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a Token, &'a TokenEntry)> + 'a {
        self.tokens
            .iter()
            .filter(move |(_, e)| repo_name.map_or(true, |r| e.repo_name == r))
    }
}

/// `sessions.json`: session id → owning repo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionIndex {
    #[serde(default, deserialize_with = "lenient_entries")]
    pub sessions: BTreeMap<String, SessionIndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndexEntry {
    pub repo_name: String,
}

impl SessionIndex {
    pub fn get(&self, session_id: &str) -> Option<&SessionIndexEntry> {
        self.sessions.get(session_id)
    }

    pub fn insert(&mut self, session_id: impl Into<String>, repo_name: impl Into<String>) {
        self.sessions.insert(
            session_id.into(),
            SessionIndexEntry {
                repo_name: repo_name.into(),
            },
        );
    }

    pub fn remove(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }
}

/// Keys that a map entry can be read from.
trait IndexKey: Ord + Sized {
    fn parse_key(raw: &str) -> Option<Self>;
}

impl IndexKey for Token {
    fn parse_key(raw: &str) -> Option<Self> {
        Token::parse(raw).ok()
    }
}

impl IndexKey for String {
    fn parse_key(raw: &str) -> Option<Self> {
        (!raw.trim().is_empty()).then(|| raw.to_owned())
    }
}

/// Read an index map entry by entry.  A malformed key or value drops only
/// that entry, so one hand-edited line never blanks the whole index.
fn lenient_entries<'de, D, K, V>(de: D) -> std::result::Result<BTreeMap<K, V>, D::Error>
where
    D: Deserializer<'de>,
    K: IndexKey,
    V: serde::de::DeserializeOwned,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(de)?;
    let mut entries = BTreeMap::new();
    for (key, value) in raw {
        let Some(parsed) = K::parse_key(&key) else {
            tracing::warn!(key = %key, "dropping index entry with malformed key");
            continue;
        };
        match serde_json::from_value::<V>(value) {
            Ok(v) => {
                entries.insert(parsed, v);
            }
            Err(e) => tracing::warn!(key = %key, error = %e, "dropping malformed index entry"),
        }
    }
    Ok(entries)
}
