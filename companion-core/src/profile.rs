//! Character and user profiles.
//!
//! Profiles are hand-written JSON files, so every field is optional and loose
//! about scalar types. Profiles are only ever rewritten through raw
//! read-modify-write, which keeps keys this crate does not model.

use crate::narration::DEFAULT_NARRATION_SYMBOL;
use crate::persist::{self, PersistError};
use crate::relationship::{RelationshipScore, DEFAULT_BAD_WEIGHT, DEFAULT_GOOD_WEIGHT};
use crate::tts::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

const RELATIONSHIP_SCORE_KEY: &str = "relationship_score";

/// Accept a string, a number or a list of strings as display text.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Some(other) => Some(other.to_string()),
    })
}

/// Accept a list of strings or a single comma separated string.
fn lenient_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        _ => Vec::new(),
    })
}

fn default_language() -> String {
    "en".to_string()
}

fn default_good_weight() -> f64 {
    DEFAULT_GOOD_WEIGHT
}

fn default_bad_weight() -> f64 {
    DEFAULT_BAD_WEIGHT
}

fn default_narration_symbol() -> char {
    DEFAULT_NARRATION_SYMBOL
}

/// Descriptive details of a character or user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterInfo {
    #[serde(default, deserialize_with = "lenient_text")]
    pub age: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub appearance: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub pet: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub likes: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub dislikes: Vec<String>,
}

/// Terminal colors for a character, by name (`"magenta"`, `"bright"`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Colors {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// A companion character.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub backstory: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub alt_names: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub personality_type: Option<String>,
    #[serde(default)]
    pub character_info: CharacterInfo,
    #[serde(default, deserialize_with = "lenient_list")]
    pub rp_mannerisms: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub starter_messages: Vec<String>,
    #[serde(default)]
    pub relationship_score: RelationshipScore,
    #[serde(default)]
    pub preferred_tts_voice: Option<String>,
    #[serde(default)]
    pub tts_engine: Engine,
    #[serde(default)]
    pub voice_clone_ref: Option<PathBuf>,
    #[serde(default = "default_language")]
    pub tts_language: String,
    #[serde(default)]
    pub llm_model: Option<String>,
    #[serde(default = "default_good_weight")]
    pub good_weight: f64,
    #[serde(default = "default_bad_weight")]
    pub bad_weight: f64,
    #[serde(default)]
    pub good_prompt_modifyer: Option<String>,
    #[serde(default)]
    pub bad_prompt_modifyer: Option<String>,
    #[serde(default)]
    pub colors: Colors,
    #[serde(default = "default_narration_symbol")]
    pub narration_symbol: char,
}

impl Default for CharacterProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            system_prompt: String::new(),
            backstory: None,
            alt_names: None,
            personality_type: None,
            character_info: CharacterInfo::default(),
            rp_mannerisms: Vec::new(),
            starter_messages: Vec::new(),
            relationship_score: RelationshipScore::default(),
            preferred_tts_voice: None,
            tts_engine: Engine::default(),
            voice_clone_ref: None,
            tts_language: default_language(),
            llm_model: None,
            good_weight: DEFAULT_GOOD_WEIGHT,
            bad_weight: DEFAULT_BAD_WEIGHT,
            good_prompt_modifyer: None,
            bad_prompt_modifyer: None,
            colors: Colors::default(),
            narration_symbol: DEFAULT_NARRATION_SYMBOL,
        }
    }
}

impl CharacterProfile {
    /// The model to chat with, falling back to the global default.
    pub fn model<'a>(&'a self, default_model: &'a str) -> &'a str {
        self.llm_model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(default_model)
    }
}

/// The person talking to the companion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default = "default_user_name")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub personality_type: Option<String>,
    #[serde(default)]
    pub character_info: CharacterInfo,
    #[serde(default, deserialize_with = "lenient_list")]
    pub rp_mannerisms: Vec<String>,
}

fn default_user_name() -> String {
    "User".to_string()
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: default_user_name(),
            personality_type: None,
            character_info: CharacterInfo::default(),
            rp_mannerisms: Vec::new(),
        }
    }
}

/// A profile file on disk together with its parsed content.
#[derive(Debug, Clone)]
pub struct LoadedProfile<T> {
    pub path: PathBuf,
    pub profile: T,
}

impl<T> LoadedProfile<T> {
    /// File name, as stored in the settings (`sassy_bot.json`).
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Key used for the history file (`sassy_bot`).
    pub fn history_key(&self) -> String {
        history_key(&self.path)
    }
}

/// Stem of a profile path, used to name its history file.
pub fn history_key(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub async fn load_character(path: impl AsRef<Path>) -> Result<LoadedProfile<CharacterProfile>, PersistError> {
    let path = path.as_ref();
    let profile: CharacterProfile = persist::load_json(path).await?;
    Ok(LoadedProfile {
        path: path.to_path_buf(),
        profile,
    })
}

pub async fn load_user(path: impl AsRef<Path>) -> Result<LoadedProfile<UserProfile>, PersistError> {
    let path = path.as_ref();
    let profile: UserProfile = persist::load_json(path).await?;
    Ok(LoadedProfile {
        path: path.to_path_buf(),
        profile,
    })
}

/// Profile files in `dir`, sorted. A missing directory has no profiles.
pub async fn list_profiles(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, PersistError> {
    match persist::list_json_files(dir).await {
        Err(PersistError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        other => other,
    }
}

fn stored_score(map: &serde_json::Map<String, Value>) -> RelationshipScore {
    map.get(RELATIONSHIP_SCORE_KEY)
        .and_then(Value::as_i64)
        .map(|v| RelationshipScore::new(v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32))
        .unwrap_or_default()
}

/// Add `delta` to the stored relationship score and return the new score.
pub async fn update_relationship_score(
    path: impl AsRef<Path>,
    delta: i32,
) -> Result<RelationshipScore, PersistError> {
    persist::modify_json_object(path, |map| {
        let score = stored_score(map).apply(delta);
        map.insert(RELATIONSHIP_SCORE_KEY.to_string(), Value::from(score.value()));
        score
    })
    .await
}

/// Overwrite the stored relationship score.
pub async fn set_relationship_score(
    path: impl AsRef<Path>,
    score: RelationshipScore,
) -> Result<(), PersistError> {
    persist::modify_json_object(path, |map| {
        map.insert(RELATIONSHIP_SCORE_KEY.to_string(), Value::from(score.value()));
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_legacy_profile_defaults() {
        let profile: CharacterProfile = serde_json::from_value(json!({"name": "Legacy"})).unwrap();
        assert_eq!(profile.tts_engine, Engine::EdgeTts);
        assert!(profile.voice_clone_ref.is_none());
        assert_eq!(profile.tts_language, "en");
        assert_eq!(profile.narration_symbol, '*');
        assert_eq!(profile.good_weight, 5.0);
    }

    #[test]
    fn test_clone_profile_fields() {
        let profile: CharacterProfile = serde_json::from_value(json!({
            "name": "Test Character",
            "preferred_tts_voice": "en-GB-SoniaNeural",
            "tts_engine": "xtts",
            "voice_clone_ref": "voices/test_ref.wav",
            "colors": {"text": "white", "label": "bright"},
            "narration_symbol": "~"
        }))
        .unwrap();
        assert_eq!(profile.tts_engine, Engine::Xtts);
        assert_eq!(profile.voice_clone_ref, Some(PathBuf::from("voices/test_ref.wav")));
        assert_eq!(profile.colors.text.as_deref(), Some("white"));
        assert_eq!(profile.narration_symbol, '~');
    }

    #[test]
    fn test_loose_scalars() {
        let profile: CharacterProfile = serde_json::from_value(json!({
            "alt_names": ["Sass", "Queen"],
            "character_info": {"age": 23, "likes": "tea, naps"},
            "rp_mannerisms": ["rolls eyes"]
        }))
        .unwrap();
        assert_eq!(profile.alt_names.as_deref(), Some("Sass, Queen"));
        assert_eq!(profile.character_info.age.as_deref(), Some("23"));
        assert_eq!(profile.character_info.likes, vec!["tea", "naps"]);
    }

    #[test]
    fn test_model_fallback() {
        let mut profile = CharacterProfile::default();
        assert_eq!(profile.model("llama3"), "llama3");
        profile.llm_model = Some("mistral".to_string());
        assert_eq!(profile.model("llama3"), "mistral");
    }

    #[tokio::test]
    async fn test_update_score_keeps_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sassy_bot.json");
        persist::save_json(&path, &json!({"name": "Sassy", "relationship_score": 98, "custom": true}))
            .await
            .unwrap();

        let score = update_relationship_score(&path, 5).await.unwrap();
        assert_eq!(score.value(), 100);

        let loaded = load_character(&path).await.unwrap();
        assert_eq!(loaded.profile.relationship_score.value(), 100);
        assert_eq!(loaded.history_key(), "sassy_bot");

        let raw: Value = persist::load_json(&path).await.unwrap();
        assert_eq!(raw["custom"], json!(true));

        set_relationship_score(&path, RelationshipScore::new(0)).await.unwrap();
        let loaded = load_character(&path).await.unwrap();
        assert_eq!(loaded.profile.relationship_score.value(), 0);
    }

    #[tokio::test]
    async fn test_list_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(list_profiles(dir.path().join("profiles")).await.unwrap().is_empty());
    }
}
