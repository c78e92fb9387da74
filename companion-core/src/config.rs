//! Data directory layout.

use crate::history::HistoryStore;
use crate::settings::SettingsStore;
use crate::tts::TtsCache;
use std::path::{Path, PathBuf};

/// Environment variable selecting the data directory.
pub const HOME_ENV: &str = "COMPANION_HOME";

/// Where profiles, history, the speech cache and settings live.
///
/// ```text
/// <root>/profiles/         character profiles
/// <root>/user_profiles/    user profiles
/// <root>/history/          one history document per character
/// <root>/cache/tts/        synthesized audio
/// <root>/settings.json
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDirs {
    root: PathBuf,
}

impl DataDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `COMPANION_HOME`, or the working directory.
    pub fn from_env() -> Self {
        match std::env::var_os(HOME_ENV) {
            Some(home) if !home.is_empty() => Self::new(home),
            _ => Self::new("."),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profiles(&self) -> PathBuf {
        self.root.join("profiles")
    }

    pub fn user_profiles(&self) -> PathBuf {
        self.root.join("user_profiles")
    }

    pub fn history(&self) -> PathBuf {
        self.root.join("history")
    }

    pub fn tts_cache(&self) -> PathBuf {
        self.root.join("cache").join("tts")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn settings_store(&self) -> SettingsStore {
        SettingsStore::new(self.settings_file())
    }

    pub fn history_store(&self) -> HistoryStore {
        HistoryStore::new(self.history())
    }

    pub fn cache(&self) -> TtsCache {
        TtsCache::new(self.tts_cache())
    }

    /// Create the directories that must exist before first use.
    pub async fn ensure(&self) -> std::io::Result<()> {
        for dir in [self.profiles(), self.user_profiles(), self.history()] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}
