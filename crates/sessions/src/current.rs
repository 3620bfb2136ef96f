//! Per-chat working token (`current.json`).
//!
//! Lets a chat send bare text without repeating its token every time.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use cr_domain::error::Result;
use cr_domain::persist::{read_json_or_default, write_json_atomic};
use cr_domain::Token;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentFile {
    #[serde(default)]
    pub chats: BTreeMap<String, CurrentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentEntry {
    pub token: Token,
    pub updated_at: DateTime<Utc>,
}

pub struct CurrentTokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CurrentTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn set(&self, chat_key: &str, token: Token) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file: CurrentFile = read_json_or_default(&self.path).await;
        file.chats.insert(
            chat_key.to_owned(),
            CurrentEntry {
                token,
                updated_at: Utc::now(),
            },
        );
        write_json_atomic(&self.path, &file).await
    }

    pub async fn get(&self, chat_key: &str) -> Option<Token> {
        let file: CurrentFile = read_json_or_default(&self.path).await;
        file.chats.get(chat_key).map(|e| e.token.clone())
    }

    /// Forget the chat's working token.  Returns whether one was set.
    pub async fn clear(&self, chat_key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut file: CurrentFile = read_json_or_default(&self.path).await;
        if file.chats.remove(chat_key).is_none() {
            return Ok(false);
        }
        write_json_atomic(&self.path, &file).await?;
        Ok(true)
    }
}
