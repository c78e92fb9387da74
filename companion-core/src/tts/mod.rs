//! Text-to-speech: job construction, caching and the backend chain.

pub mod backend;
pub mod cache;
pub mod generator;

pub use backend::{
    Capability, Connectivity, EdgeTtsBackend, LocalCloneBackend, RemoteCloneBackend, SynthesisBackend,
    SynthesisRequest, TcpConnectivity,
};
pub use cache::{Fingerprint, TtsCache};
pub use generator::TtsGenerator;

use crate::narration::NarrationState;
use crate::process::CommandError;
use crate::profile::CharacterProfile;
use crate::segmenter::Segment;
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors from speech synthesis.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("nothing speakable in segment")]
    NothingToSpeak,

    #[error("no network connection")]
    Offline,

    #[error("{backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("{backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("{backend} timed out")]
    Timeout { backend: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("all synthesis backends failed")]
    Exhausted,
}

impl TtsError {
    pub(crate) fn from_command(backend: &str, error: CommandError) -> Self {
        match error {
            CommandError::NotFound { program } => TtsError::Unavailable {
                backend: backend.to_string(),
                reason: format!("{program} not installed"),
            },
            CommandError::Timeout { .. } => TtsError::Timeout {
                backend: backend.to_string(),
            },
            other => TtsError::Backend {
                backend: backend.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Which synthesis engine a voice is meant for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Engine {
    /// Cloud neural voices.
    #[default]
    EdgeTts,
    /// XTTS voice cloning from a reference clip.
    Xtts,
}

impl Engine {
    pub fn id(&self) -> &'static str {
        match self {
            Engine::EdgeTts => "edge-tts",
            Engine::Xtts => "xtts",
        }
    }

    /// Tag shown before the character's name, e.g. `[EDGE-TTS]`.
    pub fn tag(&self) -> String {
        format!("[{}]", self.id().to_uppercase())
    }

    /// File extension of audio this engine produces.
    pub fn extension(&self) -> &'static str {
        match self {
            Engine::EdgeTts => "mp3",
            Engine::Xtts => "wav",
        }
    }
}

impl From<String> for Engine {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "xtts" | "xtts_v2" | "xtts-v2" => Engine::Xtts,
            "edge-tts" | "edge_tts" | "edge" => Engine::EdgeTts,
            other => {
                tracing::warn!(engine = other, "unknown tts engine, using edge-tts");
                Engine::EdgeTts
            }
        }
    }
}

impl From<Engine> for String {
    fn from(engine: Engine) -> Self {
        engine.id().to_string()
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// One unit of work for the generation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtsJob {
    pub text: String,
    /// `None` means the configured default voice.
    pub voice: Option<String>,
    pub engine: Engine,
    pub clone_ref: Option<PathBuf>,
    pub language: String,
}

/// How a speaker sounds: voice, engine and clone settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceProfile {
    pub voice: Option<String>,
    pub engine: Engine,
    pub clone_ref: Option<PathBuf>,
    pub language: String,
}

impl VoiceProfile {
    pub fn character(profile: &CharacterProfile) -> Self {
        Self {
            voice: profile.preferred_tts_voice.clone(),
            engine: profile.tts_engine,
            clone_ref: profile.voice_clone_ref.clone(),
            language: profile.tts_language.clone(),
        }
    }

    /// The narrator always uses a neural voice in English.
    pub fn narrator(voice: impl Into<String>) -> Self {
        Self {
            voice: Some(voice.into()),
            engine: Engine::EdgeTts,
            clone_ref: None,
            language: "en".to_string(),
        }
    }

    pub fn job(&self, text: impl Into<String>) -> TtsJob {
        TtsJob {
            text: text.into(),
            voice: self.voice.clone(),
            engine: self.engine,
            clone_ref: self.clone_ref.clone(),
            language: self.language.clone(),
        }
    }
}

/// Maps segments to synthesis jobs in the right voice.
#[derive(Debug, Clone)]
pub struct VoiceSelector {
    pub character: VoiceProfile,
    pub narrator: VoiceProfile,
    pub speak_narration: bool,
    pub symbol: char,
}

impl VoiceSelector {
    pub fn new(profile: &CharacterProfile, settings: &Settings) -> Self {
        Self {
            character: VoiceProfile::character(profile),
            narrator: VoiceProfile::narrator(settings.narration_tts_voice.clone()),
            speak_narration: settings.speak_narration,
            symbol: profile.narration_symbol,
        }
    }

    /// The job for `segment`, or `None` when there is nothing to say.
    pub fn job_for(&self, segment: &Segment) -> Option<TtsJob> {
        if segment.narration.is_narration() && !self.speak_narration {
            return None;
        }
        let text = clean_text_for_tts(&segment.text, self.symbol, true);
        if !has_speakable(&text) {
            return None;
        }
        let voice = match segment.narration {
            NarrationState::Narration => &self.narrator,
            NarrationState::Prose => &self.character,
        };
        Some(voice.job(text))
    }
}

/// Strip markup so only speakable text remains.
///
/// With `speak_narration` the narration symbol, parentheses and brackets are
/// removed but their contents kept. Without it, everything enclosed by them is
/// dropped too. Whitespace is collapsed, and text made only of punctuation
/// becomes empty.
pub fn clean_text_for_tts(text: &str, symbol: char, speak_narration: bool) -> String {
    let mut kept = String::with_capacity(text.len());

    if speak_narration {
        kept.extend(
            text.chars()
                .filter(|&c| c != symbol && !matches!(c, '(' | ')' | '[' | ']')),
        );
    } else {
        let mut in_narration = false;
        let mut parens = 0usize;
        let mut brackets = 0usize;
        for c in text.chars() {
            match c {
                c if c == symbol => in_narration = !in_narration,
                '(' => parens += 1,
                ')' => parens = parens.saturating_sub(1),
                '[' => brackets += 1,
                ']' => brackets = brackets.saturating_sub(1),
                c if !in_narration && parens == 0 && brackets == 0 => kept.push(c),
                _ => {}
            }
        }
    }

    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().all(|c| ".,!?;:- ".contains(c)) {
        String::new()
    } else {
        collapsed
    }
}

/// Whether `text` has anything worth synthesizing.
pub fn has_speakable(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(text: &str, narration: NarrationState) -> Segment {
        Segment {
            text: text.to_string(),
            narration,
        }
    }

    fn selector() -> VoiceSelector {
        let profile = CharacterProfile {
            preferred_tts_voice: Some("en-GB-LibbyNeural".to_string()),
            tts_engine: Engine::Xtts,
            voice_clone_ref: Some(PathBuf::from("voices/luna.wav")),
            tts_language: "fr".to_string(),
            ..CharacterProfile::default()
        };
        VoiceSelector::new(&profile, &Settings::default())
    }

    #[test]
    fn test_clean_keeps_narration_words() {
        assert_eq!(clean_text_for_tts("*waves*  hello (softly)", '*', true), "waves hello softly");
    }

    #[test]
    fn test_clean_drops_narration() {
        assert_eq!(clean_text_for_tts("Hi *waves* there (softly) [x]", '*', false), "Hi there");
    }

    #[test]
    fn test_clean_punctuation_only() {
        assert_eq!(clean_text_for_tts(" *...* ", '*', true), "");
        assert_eq!(clean_text_for_tts("!?", '*', true), "");
    }

    #[test]
    fn test_engine_parsing() {
        assert_eq!(Engine::from("xtts".to_string()), Engine::Xtts);
        assert_eq!(Engine::from("EDGE-TTS".to_string()), Engine::EdgeTts);
        assert_eq!(Engine::from("pyttsx3".to_string()), Engine::EdgeTts);
        assert_eq!(Engine::Xtts.tag(), "[XTTS]");
    }

    #[test]
    fn test_selector_routes_by_narration() {
        let selector = selector();

        let prose = selector.job_for(&segment("Bonjour.", NarrationState::Prose)).unwrap();
        assert_eq!(prose.engine, Engine::Xtts);
        assert_eq!(prose.language, "fr");
        assert_eq!(prose.clone_ref, Some(PathBuf::from("voices/luna.wav")));

        let narration = selector.job_for(&segment("waves*", NarrationState::Narration)).unwrap();
        assert_eq!(narration.text, "waves");
        assert_eq!(narration.engine, Engine::EdgeTts);
        assert_eq!(narration.voice.as_deref(), Some("en-US-AndrewNeural"));
        assert_eq!(narration.clone_ref, None);
        assert_eq!(narration.language, "en");
    }

    #[test]
    fn test_selector_skips_empty_and_muted_narration() {
        let mut selector = selector();
        assert!(selector.job_for(&segment(" *", NarrationState::Narration)).is_none());

        selector.speak_narration = false;
        assert!(selector.job_for(&segment("waves*", NarrationState::Narration)).is_none());
        assert!(selector.job_for(&segment("Hi.", NarrationState::Prose)).is_some());
    }
}
