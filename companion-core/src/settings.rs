//! Global application settings (`settings.json`).
//!
//! The file is a flat JSON object. It is re-read before every turn so edits
//! made by commands or by hand take effect immediately. Updates are
//! read-modify-write and leave keys this crate does not know about intact.

use crate::persist::{self, PersistError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Setting keys.
pub mod keys {
    pub const TTS_ENABLED: &str = "tts_enabled";
    pub const EXECUTE_COMMAND: &str = "execute_command";
    pub const SPEAK_NARRATION: &str = "speak_narration";
    pub const DEFAULT_LLM_MODEL: &str = "default_llm_model";
    pub const DEFAULT_TTS_VOICE: &str = "default_tts_voice";
    pub const NARRATION_TTS_VOICE: &str = "narration_tts_voice";
    pub const HISTORY_LIMIT: &str = "history_limit";
    pub const REMOTE_TTS_URL: &str = "remote_tts_url";
    pub const REMOTE_TTS_TIMEOUT_SECS: &str = "remote_tts_timeout_secs";
    pub const OLLAMA_URL: &str = "ollama_url";
    pub const CLEAR_AT_START: &str = "clear_at_start";
    pub const AUTO_RECAP_ON_START: &str = "auto_recap_on_start";
    pub const SHOW_TTS_ENGINE: &str = "show_tts_engine";
    pub const TTS_RATE: &str = "tts_rate";
    pub const DEBUG_MODE: &str = "debug_mode";
    pub const CURRENT_CHARACTER_PROFILE: &str = "current_character_profile";
    pub const CURRENT_USER_PROFILE: &str = "current_user_profile";
}

/// Typed snapshot of the settings document.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub tts_enabled: bool,
    pub execute_command: bool,
    pub speak_narration: bool,
    pub default_llm_model: String,
    pub default_tts_voice: String,
    pub narration_tts_voice: String,
    pub history_limit: usize,
    pub remote_tts_url: Option<String>,
    pub remote_tts_timeout_secs: u64,
    pub ollama_url: String,
    pub clear_at_start: bool,
    pub auto_recap_on_start: bool,
    pub show_tts_engine: bool,
    pub tts_rate: u32,
    pub debug_mode: bool,
    pub current_character_profile: Option<String>,
    pub current_user_profile: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tts_enabled: true,
            execute_command: false,
            speak_narration: true,
            default_llm_model: "llama3".to_string(),
            default_tts_voice: "en-GB-SoniaNeural".to_string(),
            narration_tts_voice: "en-US-AndrewNeural".to_string(),
            history_limit: 10,
            remote_tts_url: None,
            remote_tts_timeout_secs: 60,
            ollama_url: "http://localhost:11434".to_string(),
            clear_at_start: true,
            auto_recap_on_start: false,
            show_tts_engine: true,
            tts_rate: 170,
            debug_mode: false,
            current_character_profile: None,
            current_user_profile: None,
        }
    }
}

fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str, default: T) -> T {
    match map.get(key) {
        None | Some(Value::Null) => default,
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "ignoring malformed setting");
            default
        }),
    }
}

impl Settings {
    /// Build a typed view, falling back per key to the default.
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let d = Settings::default();
        Self {
            tts_enabled: field(map, keys::TTS_ENABLED, d.tts_enabled),
            execute_command: field(map, keys::EXECUTE_COMMAND, d.execute_command),
            speak_narration: field(map, keys::SPEAK_NARRATION, d.speak_narration),
            default_llm_model: field(map, keys::DEFAULT_LLM_MODEL, d.default_llm_model),
            default_tts_voice: field(map, keys::DEFAULT_TTS_VOICE, d.default_tts_voice),
            narration_tts_voice: field(map, keys::NARRATION_TTS_VOICE, d.narration_tts_voice),
            history_limit: field(map, keys::HISTORY_LIMIT, d.history_limit),
            remote_tts_url: field::<Option<String>>(map, keys::REMOTE_TTS_URL, None)
                .filter(|url| !url.trim().is_empty()),
            remote_tts_timeout_secs: field(map, keys::REMOTE_TTS_TIMEOUT_SECS, d.remote_tts_timeout_secs),
            ollama_url: field(map, keys::OLLAMA_URL, d.ollama_url),
            clear_at_start: field(map, keys::CLEAR_AT_START, d.clear_at_start),
            auto_recap_on_start: field(map, keys::AUTO_RECAP_ON_START, d.auto_recap_on_start),
            show_tts_engine: field(map, keys::SHOW_TTS_ENGINE, d.show_tts_engine),
            tts_rate: field(map, keys::TTS_RATE, d.tts_rate),
            debug_mode: field(map, keys::DEBUG_MODE, d.debug_mode),
            current_character_profile: field(map, keys::CURRENT_CHARACTER_PROFILE, None),
            current_user_profile: field(map, keys::CURRENT_USER_PROFILE, None),
        }
    }
}

/// Handle to the settings file.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The raw document. Missing or corrupt files read as `{}`.
    pub async fn load_raw(&self) -> Map<String, Value> {
        persist::load_json_object(&self.path).await
    }

    pub async fn load(&self) -> Settings {
        Settings::from_map(&self.load_raw().await)
    }

    /// A single key, if present and of the right type.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let map = self.load_raw().await;
        map.get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub async fn set(&self, key: &str, value: impl Serialize) -> Result<(), PersistError> {
        let value = serde_json::to_value(value)?;
        persist::update_json_object(&self.path, |map| {
            map.insert(key.to_string(), value);
        })
        .await
    }

    /// Flip a boolean setting and return the new value.
    pub async fn toggle(&self, key: &str, default: bool) -> Result<bool, PersistError> {
        persist::update_json_object(&self.path, |map| {
            let current = map.get(key).and_then(Value::as_bool).unwrap_or(default);
            map.insert(key.to_string(), Value::Bool(!current));
            !current
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_for_empty_map() {
        assert_eq!(Settings::from_map(&Map::new()), Settings::default());
    }

    #[test]
    fn test_malformed_value_falls_back() {
        let map = match json!({"history_limit": "lots", "tts_enabled": false}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let settings = Settings::from_map(&map);
        assert_eq!(settings.history_limit, 10);
        assert!(!settings.tts_enabled);
    }

    #[test]
    fn test_blank_remote_url_is_unset() {
        let map = match json!({"remote_tts_url": "  "}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert_eq!(Settings::from_map(&map).remote_tts_url, None);
    }

    #[tokio::test]
    async fn test_toggle_and_set_preserve_other_keys() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        store.set("theme", "dark").await.unwrap();

        assert!(!store.toggle(keys::TTS_ENABLED, true).await.unwrap());
        assert!(store.toggle(keys::TTS_ENABLED, true).await.unwrap());
        store.set(keys::HISTORY_LIMIT, 4).await.unwrap();

        let settings = store.load().await;
        assert!(settings.tts_enabled);
        assert_eq!(settings.history_limit, 4);
        assert_eq!(store.get::<String>("theme").await.as_deref(), Some("dark"));
    }

    #[tokio::test]
    async fn test_missing_file_reads_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load().await, Settings::default());
        assert_eq!(store.get::<bool>(keys::DEBUG_MODE).await, None);
    }
}
