//! Content-addressed store of synthesized audio.
//!
//! Entries are keyed by a SHA-256 fingerprint of the text, the voice and an
//! engine key. Entries never expire; [`TtsCache::clear`] removes the whole
//! store. Entries are written to a temp file and renamed into place, so a
//! concurrent reader sees either nothing or the complete payload.

use super::{Engine, TtsError};
use crate::persist;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Stand-in voice identifier when none is set.
pub const DEFAULT_VOICE_SENTINEL: &str = "default";

const ENTRY_EXTENSION: &str = "tts";

/// Hex-encoded cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a synthesis request.
    ///
    /// Fields are length-prefixed so no two different tuples can hash the
    /// same byte sequence.
    pub fn new(text: &str, voice: Option<&str>, engine_key: &str) -> Self {
        let voice = voice.filter(|v| !v.is_empty()).unwrap_or(DEFAULT_VOICE_SENTINEL);
        let mut hasher = Sha256::new();
        for field in [text, voice, engine_key] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Engine identifier for the cache key.
///
/// For the cloning engine the reference clip and language are part of the
/// key, so two characters cloned from different clips never share entries.
pub fn engine_key(engine: Engine, clone_ref: Option<&Path>, language: &str) -> String {
    match engine {
        Engine::Xtts => format!(
            "{}|{}|{}",
            engine.id(),
            clone_ref.map(|p| p.display().to_string()).unwrap_or_default(),
            language
        ),
        Engine::EdgeTts => engine.id().to_string(),
    }
}

/// On-disk audio cache.
#[derive(Debug, Clone)]
pub struct TtsCache {
    dir: PathBuf,
}

impl TtsCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.{}", fingerprint.as_str(), ENTRY_EXTENSION))
    }

    /// Cached bytes for `fingerprint`, if any.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>, TtsError> {
        match fs::read(self.entry_path(fingerprint)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Copy a cached entry to `out`. Returns false on a miss.
    pub async fn copy_to(&self, fingerprint: &Fingerprint, out: &Path) -> Result<bool, TtsError> {
        match fs::copy(self.entry_path(fingerprint), out).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn store(&self, fingerprint: &Fingerprint, bytes: &[u8]) -> Result<(), TtsError> {
        persist::write_atomic(&self.entry_path(fingerprint), bytes)
            .await
            .map_err(|e| match e {
                persist::PersistError::Io(io) => TtsError::Io(io),
                other => TtsError::Io(std::io::Error::other(other.to_string())),
            })
    }

    /// Store the contents of a freshly synthesized file.
    pub async fn store_file(&self, fingerprint: &Fingerprint, path: &Path) -> Result<(), TtsError> {
        let bytes = fs::read(path).await?;
        self.store(fingerprint, &bytes).await
    }

    /// Number of cached entries.
    pub async fn len(&self) -> Result<usize, TtsError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().map(|e| e == ENTRY_EXTENSION).unwrap_or(false) {
                count += 1;
            }
        }
        Ok(count)
    }

    pub async fn is_empty(&self) -> Result<bool, TtsError> {
        Ok(self.len().await? == 0)
    }

    /// Delete the entire store. Returns how many entries were removed.
    pub async fn clear(&self) -> Result<usize, TtsError> {
        let count = self.len().await?;
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(entries = count, dir = %self.dir.display(), "tts cache cleared");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::new("Hello.", Some("en-GB-SoniaNeural"), "edge-tts");
        let b = Fingerprint::new("Hello.", Some("en-GB-SoniaNeural"), "edge-tts");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_every_field_changes_fingerprint() {
        let clip = Path::new("voices/a.wav");
        let base = Fingerprint::new("Hi", Some("v"), &engine_key(Engine::Xtts, Some(clip), "en"));
        let variants = [
            Fingerprint::new("Hi!", Some("v"), &engine_key(Engine::Xtts, Some(clip), "en")),
            Fingerprint::new("Hi", Some("w"), &engine_key(Engine::Xtts, Some(clip), "en")),
            Fingerprint::new("Hi", Some("v"), &engine_key(Engine::EdgeTts, Some(clip), "en")),
            Fingerprint::new("Hi", Some("v"), &engine_key(Engine::Xtts, Some(Path::new("voices/b.wav")), "en")),
            Fingerprint::new("Hi", Some("v"), &engine_key(Engine::Xtts, Some(clip), "fr")),
        ];
        for variant in variants {
            assert_ne!(base, variant);
        }
    }

    #[test]
    fn test_field_boundaries_do_not_collide() {
        assert_ne!(
            Fingerprint::new("ab", Some("c"), "edge-tts"),
            Fingerprint::new("a", Some("bc"), "edge-tts")
        );
    }

    #[test]
    fn test_unset_voice_uses_sentinel() {
        assert_eq!(
            Fingerprint::new("x", None, "edge-tts"),
            Fingerprint::new("x", Some(DEFAULT_VOICE_SENTINEL), "edge-tts")
        );
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = TtsCache::new(dir.path().join("cache"));
        let key = Fingerprint::new("Hello", None, "edge-tts");

        assert_eq!(cache.lookup(&key).await.unwrap(), None);
        cache.store(&key, b"ID3 audio").await.unwrap();
        assert_eq!(cache.lookup(&key).await.unwrap().as_deref(), Some(&b"ID3 audio"[..]));

        let out = dir.path().join("out.mp3");
        assert!(cache.copy_to(&key, &out).await.unwrap());
        assert_eq!(std::fs::read(&out).unwrap(), b"ID3 audio");
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let cache = TtsCache::new(dir.path().join("cache"));
        cache.store(&Fingerprint::new("a", None, "edge-tts"), b"1").await.unwrap();
        cache.store(&Fingerprint::new("b", None, "edge-tts"), b"2").await.unwrap();

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.is_empty().await.unwrap());
        assert_eq!(cache.clear().await.unwrap(), 0);
    }
}
