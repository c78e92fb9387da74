//! Per-character conversation history.
//!
//! One JSON document per character:
//!
//! ```json
//! {
//!   "metadata": { "last_interaction": "2024-05-01 | 18:22:10", "mood_score": 12 },
//!   "history": [ { "role": "user", "content": "hi" }, ... ]
//! }
//! ```
//!
//! Older files were a bare array of messages that carried the last
//! interaction time as a system message starting with `Timestamp: `. Those
//! still load. The full history is always persisted; truncation only applies
//! to what is handed to the model.

use crate::persist::{self, PersistError};
use chrono::{Local, NaiveDateTime};
use ollama::{Message, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Format of `metadata.last_interaction`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d | %H:%M:%S";

const LEGACY_TIMESTAMP_PREFIX: &str = "Timestamp: ";

/// One stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User.as_str().to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant.as_str().to_string(),
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User.as_str()
    }

    /// Convert to a chat message. Unknown roles are dropped.
    pub fn to_message(&self) -> Option<Message> {
        match self.role.as_str() {
            "user" => Some(Message::user(self.content.clone())),
            "assistant" => Some(Message::assistant(self.content.clone())),
            "system" => Some(Message::system(self.content.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMetadata {
    #[serde(default)]
    pub last_interaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_score: Option<i32>,
}

impl HistoryMetadata {
    /// Parsed `last_interaction`, if present and well formed.
    pub fn last_interaction_time(&self) -> Option<NaiveDateTime> {
        self.last_interaction
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT).ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDocument {
    #[serde(default)]
    pub metadata: HistoryMetadata,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl HistoryDocument {
    /// Interpret any JSON value as a history document.
    ///
    /// Bare arrays are the legacy format. Anything unrecognisable is empty.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::from_legacy(items),
            Value::Object(_) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "malformed history document, starting fresh");
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    fn from_legacy(items: Vec<Value>) -> Self {
        let entries: Vec<HistoryEntry> = items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect();

        let last_interaction = entries.iter().rev().find_map(|entry| {
            (entry.role == "system" && entry.content.contains(LEGACY_TIMESTAMP_PREFIX))
                .then(|| entry.content.replace(LEGACY_TIMESTAMP_PREFIX, "").trim().to_string())
        });

        Self {
            metadata: HistoryMetadata {
                last_interaction,
                mood_score: None,
            },
            history: entries.into_iter().filter(|e| e.role != "system").collect(),
        }
    }

    /// The most recent `limit` entries. A limit of 0 means all of them.
    pub fn recent(&self, limit: usize) -> &[HistoryEntry] {
        if limit == 0 || self.history.len() <= limit {
            &self.history
        } else {
            &self.history[self.history.len() - limit..]
        }
    }
}

/// Keep letters, digits, spaces, underscores and dashes.
pub fn safe_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// History files under one directory.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}_history.json", safe_name(name)))
    }

    /// Load the whole document. Missing or corrupt files are empty.
    pub async fn load_document(&self, name: &str) -> HistoryDocument {
        let value: Value = persist::load_json_or_default(self.path_for(name)).await;
        HistoryDocument::from_value(value)
    }

    /// The most recent `limit` messages, or all of them when `limit` is 0.
    pub async fn load(&self, name: &str, limit: usize) -> Vec<HistoryEntry> {
        self.load_document(name).await.recent(limit).to_vec()
    }

    /// Replace the stored history, stamping the current time.
    pub async fn save(
        &self,
        name: &str,
        history: &[HistoryEntry],
        mood_score: i32,
    ) -> Result<(), PersistError> {
        let document = HistoryDocument {
            metadata: HistoryMetadata {
                last_interaction: Some(Local::now().format(TIMESTAMP_FORMAT).to_string()),
                mood_score: Some(mood_score),
            },
            history: history.to_vec(),
        };
        persist::save_json(self.path_for(name), &document).await
    }

    /// Append entries to the stored history and save.
    pub async fn append(
        &self,
        name: &str,
        entries: impl IntoIterator<Item = HistoryEntry>,
        mood_score: i32,
    ) -> Result<(), PersistError> {
        let mut document = self.load_document(name).await;
        document.history.extend(entries);
        self.save(name, &document.history, mood_score).await
    }

    pub async fn last_interaction(&self, name: &str) -> Option<NaiveDateTime> {
        self.load_document(name).await.metadata.last_interaction_time()
    }

    /// Whether the last interaction was at most `hours` ago.
    pub async fn is_recent(&self, name: &str, hours: i64) -> bool {
        match self.last_interaction(name).await {
            Some(last) => Local::now().naive_local() - last <= chrono::Duration::hours(hours),
            None => false,
        }
    }

    /// History files, sorted.
    pub async fn list(&self) -> Result<Vec<PathBuf>, PersistError> {
        match persist::list_json_files(&self.dir).await {
            Err(PersistError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            other => other,
        }
    }

    /// Wipe one character's history.
    pub async fn reset(&self, name: &str) -> Result<(), PersistError> {
        reset_file(&self.path_for(name)).await
    }

    /// Wipe every history file. Returns how many were wiped.
    pub async fn reset_all(&self) -> Result<usize, PersistError> {
        let files = self.list().await?;
        for file in &files {
            reset_file(file).await?;
        }
        Ok(files.len())
    }
}

/// Wipe a history file by path, leaving an empty legacy-format document.
pub async fn reset_file(path: &Path) -> Result<(), PersistError> {
    persist::write_atomic(path, b"[]").await
}
