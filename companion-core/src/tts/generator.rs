//! The generation stage: cache first, then the backend chain.

use super::backend::{
    Capability, Connectivity, EdgeTtsBackend, LocalCloneBackend, RemoteCloneBackend, SynthesisBackend,
    SynthesisRequest,
};
use super::cache::{engine_key, Fingerprint, TtsCache};
use super::{has_speakable, Engine, TtsError, TtsJob};
use crate::playback::AudioArtifact;
use crate::settings::Settings;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const LOCAL_CLONE_TIMEOUT: Duration = Duration::from_secs(180);
const EDGE_TTS_TIMEOUT: Duration = Duration::from_secs(30);

/// Produces audio artifacts for jobs.
///
/// Backends are tried in order. Cloning backends are only used for jobs that
/// ask for the cloning engine; every job may fall through to the neural
/// backends.
pub struct TtsGenerator {
    cache: TtsCache,
    backends: Vec<Arc<dyn SynthesisBackend>>,
    default_voice: String,
    scratch_dir: PathBuf,
}

impl TtsGenerator {
    pub fn new(cache: TtsCache, default_voice: impl Into<String>) -> Self {
        Self {
            cache,
            backends: Vec::new(),
            default_voice: default_voice.into(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// A generator with no backends yet, using the configured default voice.
    pub fn for_settings(settings: &Settings, cache: TtsCache) -> Self {
        Self::new(cache, settings.default_tts_voice.clone())
    }

    /// The standard chain: local clone (if installed), remote clone (if
    /// configured), then edge-tts.
    pub fn from_settings(settings: &Settings, cache: TtsCache, connectivity: Arc<dyn Connectivity>) -> Self {
        let mut generator = Self::for_settings(settings, cache);

        if let Some(local) = LocalCloneBackend::detect(LOCAL_CLONE_TIMEOUT) {
            generator = generator.with_backend(Arc::new(local));
        }
        if let Some(url) = settings.remote_tts_url.as_deref() {
            match RemoteCloneBackend::new(url, Duration::from_secs(settings.remote_tts_timeout_secs)) {
                Ok(remote) => generator = generator.with_backend(Arc::new(remote)),
                Err(e) => tracing::warn!(error = %e, "remote clone backend disabled"),
            }
        }
        generator.with_backend(Arc::new(EdgeTtsBackend::new(connectivity, EDGE_TTS_TIMEOUT)))
    }

    pub fn with_backend(mut self, backend: Arc<dyn SynthesisBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Where artifacts are written before playback.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn cache(&self) -> &TtsCache {
        &self.cache
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    fn plan(&self, engine: Engine) -> impl Iterator<Item = &Arc<dyn SynthesisBackend>> + '_ {
        let clones = self
            .backends
            .iter()
            .filter(move |b| engine == Engine::Xtts && b.capability() == Capability::VoiceClone);
        let neural = self
            .backends
            .iter()
            .filter(|b| b.capability() == Capability::NeuralVoice);
        clones.chain(neural)
    }

    /// Synthesize `job`, or fail once every backend has failed.
    pub async fn generate(&self, job: &TtsJob) -> Result<AudioArtifact, TtsError> {
        // Job text arrives already cleaned for the speaker's narration symbol.
        let text = job.text.trim().to_string();
        if !has_speakable(&text) {
            return Err(TtsError::NothingToSpeak);
        }

        let voice = job
            .voice
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.default_voice);
        let request = SynthesisRequest {
            text: &text,
            voice,
            clone_ref: job.clone_ref.as_deref(),
            language: &job.language,
        };

        let stem = self.scratch_dir.join(format!("tts_{}", uuid::Uuid::new_v4().simple()));
        let mut checked = HashSet::new();

        for backend in self.plan(job.engine) {
            let engine = backend.capability().engine();
            let out = stem.with_extension(engine.extension());
            let key = Fingerprint::new(&text, Some(voice), &engine_key(engine, request.clone_ref, request.language));

            if checked.insert(key.clone()) {
                match self.cache.copy_to(&key, &out).await {
                    Ok(true) => {
                        tracing::debug!(fingerprint = %key, engine = %engine, "tts cache hit");
                        return Ok(AudioArtifact::new(out));
                    }
                    Ok(false) => tracing::debug!(fingerprint = %key, engine = %engine, "tts cache miss"),
                    Err(e) => tracing::warn!(error = %e, "tts cache unreadable, synthesizing"),
                }
            }

            tracing::debug!(backend = backend.name(), "synthesizing");
            match backend.synthesize(&request, &out).await {
                Ok(()) => {
                    if is_nonempty(&out).await {
                        if let Err(e) = self.cache.store_file(&key, &out).await {
                            tracing::warn!(error = %e, "failed to store tts cache entry");
                        }
                        return Ok(AudioArtifact::new(out));
                    }
                    tracing::warn!(backend = backend.name(), "backend produced no audio, trying next");
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "backend failed, trying next");
                }
            }
            let _ = tokio::fs::remove_file(&out).await;
        }

        Err(TtsError::Exhausted)
    }
}

async fn is_nonempty(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use tempfile::TempDir;

    fn job(text: &str, engine: Engine) -> TtsJob {
        TtsJob {
            text: text.to_string(),
            voice: None,
            engine,
            clone_ref: Some(PathBuf::from("voices/luna.wav")),
            language: "en".to_string(),
        }
    }

    fn generator(dir: &TempDir) -> TtsGenerator {
        TtsGenerator::new(TtsCache::new(dir.path().join("cache")), "en-GB-SoniaNeural")
            .with_scratch_dir(dir.path())
    }

    #[tokio::test]
    async fn test_nothing_to_speak() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::succeeding("edge", Capability::NeuralVoice, b"mp3"));
        let generator = generator(&dir).with_backend(backend.clone());

        let err = generator.generate(&job(" *...* ", Engine::EdgeTts)).await.unwrap_err();
        assert!(matches!(err, TtsError::NothingToSpeak));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_second_request_hits_cache() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::succeeding("edge", Capability::NeuralVoice, b"mp3"));
        let generator = generator(&dir).with_backend(backend.clone());

        let first = generator.generate(&job("Hello.", Engine::EdgeTts)).await.unwrap();
        let second = generator.generate(&job("Hello.", Engine::EdgeTts)).await.unwrap();

        assert_eq!(backend.calls(), vec!["Hello.".to_string()]);
        assert_eq!(std::fs::read(second.path()).unwrap(), b"mp3");
        assert_ne!(first.path(), second.path());
    }

    #[tokio::test]
    async fn test_clone_chain_falls_back_in_order() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(ScriptedBackend::failing("local", Capability::VoiceClone));
        let remote = Arc::new(ScriptedBackend::failing("remote", Capability::VoiceClone));
        let edge = Arc::new(ScriptedBackend::succeeding("edge", Capability::NeuralVoice, b"mp3"));
        let generator = generator(&dir)
            .with_backend(local.clone())
            .with_backend(remote.clone())
            .with_backend(edge.clone());

        let artifact = generator.generate(&job("Hi there.", Engine::Xtts)).await.unwrap();
        assert_eq!(local.calls().len(), 1);
        assert_eq!(remote.calls().len(), 1);
        assert_eq!(edge.calls().len(), 1);
        assert_eq!(artifact.path().extension().unwrap(), "mp3");
    }

    #[tokio::test]
    async fn test_neural_job_skips_clone_backends() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(ScriptedBackend::succeeding("local", Capability::VoiceClone, b"wav"));
        let edge = Arc::new(ScriptedBackend::succeeding("edge", Capability::NeuralVoice, b"mp3"));
        let generator = generator(&dir).with_backend(local.clone()).with_backend(edge.clone());

        generator.generate(&job("Narration.", Engine::EdgeTts)).await.unwrap();
        assert!(local.calls().is_empty());
        assert_eq!(edge.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_when_all_fail() {
        let dir = TempDir::new().unwrap();
        let generator = generator(&dir)
            .with_backend(Arc::new(ScriptedBackend::failing("local", Capability::VoiceClone)))
            .with_backend(Arc::new(ScriptedBackend::failing("edge", Capability::NeuralVoice)));

        let err = generator.generate(&job("Hello.", Engine::Xtts)).await.unwrap_err();
        assert!(matches!(err, TtsError::Exhausted));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
