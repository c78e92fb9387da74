//! JSON document persistence shared by settings, profiles and history.
//!
//! Every persisted document is a whole JSON file that is read, modified and
//! written back in one go. Writes go to a sibling temp file first and are
//! renamed into place, so readers never observe a half-written document.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid document at {path}: {reason}")]
    InvalidFormat { path: String, reason: String },
}

/// Read and parse a JSON document.
pub async fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, PersistError> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Read a JSON document, falling back to `T::default()` when the file is
/// missing or malformed.
pub async fn load_json_or_default<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> T {
    let path = path.as_ref();
    match fs::read_to_string(path).await {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "malformed JSON document, using defaults");
                T::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable JSON document, using defaults");
            T::default()
        }
    }
}

/// Serialize `value` as pretty JSON and atomically replace the file at `path`.
pub async fn save_json<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<(), PersistError> {
    let content = serde_json::to_string_pretty(value)?;
    write_atomic(path.as_ref(), content.as_bytes()).await
}

/// Write `bytes` to a temp file next to `path`, then rename it into place.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp = temp_sibling(path);
    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Load a raw JSON object, apply `update`, and write it back.
///
/// Unknown keys survive the round trip because the document is never forced
/// through a typed struct. A missing or malformed file starts from `{}`.
pub async fn update_json_object<R>(
    path: impl AsRef<Path>,
    update: impl FnOnce(&mut serde_json::Map<String, serde_json::Value>) -> R,
) -> Result<R, PersistError> {
    let path = path.as_ref();
    let mut object = load_json_object(path).await;
    let result = update(&mut object);
    save_json(path, &object).await?;
    Ok(result)
}

/// Like [`update_json_object`], but the document must already exist and be a
/// JSON object. Nothing is written when it cannot be read or parsed.
pub async fn modify_json_object<R>(
    path: impl AsRef<Path>,
    update: impl FnOnce(&mut serde_json::Map<String, serde_json::Value>) -> R,
) -> Result<R, PersistError> {
    let path = path.as_ref();
    let mut object = match load_json::<serde_json::Value>(path).await? {
        serde_json::Value::Object(map) => map,
        _ => {
            return Err(PersistError::InvalidFormat {
                path: path.display().to_string(),
                reason: "expected a JSON object".to_string(),
            })
        }
    };
    let result = update(&mut object);
    save_json(path, &object).await?;
    Ok(result)
}

/// Load a raw JSON object, treating anything else as empty.
pub async fn load_json_object(path: impl AsRef<Path>) -> serde_json::Map<String, serde_json::Value> {
    match load_json_or_default::<serde_json::Value>(path).await {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

/// List `*.json` files in a directory, sorted by file name.
pub async fn list_json_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, PersistError> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Human readable name for a profile or history file: `sassy_bot.json` -> `Sassy Bot`.
pub fn display_name(path: impl AsRef<Path>) -> String {
    let stem = path
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    stem.replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}
