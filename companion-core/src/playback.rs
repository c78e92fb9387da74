//! The playback stage.
//!
//! Plays one utterance at a time, to completion, in the order received.
//! Synthesized artifacts are deleted after playback whether or not playback
//! succeeded or was muted.

use crate::process::{self, CommandError};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const PLAYER_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A synthesized audio file awaiting playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    path: PathBuf,
}

impl AudioArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file.
    pub async fn remove(self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "failed to delete audio artifact"),
        }
    }
}

/// Something for the playback stage to voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Utterance {
    /// A synthesized file.
    Audio(AudioArtifact),
    /// Text for the offline synthesizer, spoken directly.
    Offline(String),
}

/// Plays an audio file to completion.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, path: &Path) -> Result<(), PlaybackError>;
}

/// Speaks text directly without producing a file.
#[async_trait]
pub trait OfflineSpeaker: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), PlaybackError>;
}

/// Plays files through an external player.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandPlayer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: PLAYER_TIMEOUT,
        }
    }

    /// `afplay` on macOS, `ffplay` elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("afplay", Vec::new())
        } else {
            Self::new(
                "ffplay",
                ["-nodisp", "-autoexit", "-loglevel", "quiet"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            )
        }
    }
}

#[async_trait]
impl AudioPlayer for CommandPlayer {
    async fn play(&self, path: &Path) -> Result<(), PlaybackError> {
        let mut args: Vec<&OsStr> = self.args.iter().map(OsStr::new).collect();
        args.push(path.as_os_str());
        process::run_with_timeout(&self.program, args, self.timeout).await?;
        Ok(())
    }
}

/// In-process playback on the default output device.
#[cfg(feature = "rodio")]
#[derive(Debug, Clone, Default)]
pub struct RodioPlayer;

#[cfg(feature = "rodio")]
#[async_trait]
impl AudioPlayer for RodioPlayer {
    async fn play(&self, path: &Path) -> Result<(), PlaybackError> {
        let path = path.to_path_buf();
        // The output stream is !Send, so it lives and dies on a blocking thread.
        tokio::task::spawn_blocking(move || -> Result<(), PlaybackError> {
            let (_stream, handle) =
                rodio::OutputStream::try_default().map_err(|e| PlaybackError::Device(e.to_string()))?;
            let sink = rodio::Sink::try_new(&handle).map_err(|e| PlaybackError::Device(e.to_string()))?;
            let file = std::io::BufReader::new(std::fs::File::open(&path)?);
            let source = rodio::Decoder::new(file).map_err(|e| PlaybackError::Device(e.to_string()))?;
            sink.append(source);
            sink.sleep_until_end();
            Ok(())
        })
        .await
        .map_err(|e| PlaybackError::Device(e.to_string()))?
    }
}

/// `espeak-ng` (or `say` on macOS) speaking text directly.
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    program: String,
    rate_flag: &'static str,
    rate: u32,
}

impl CommandSpeaker {
    pub fn platform_default(rate: u32) -> Self {
        if cfg!(target_os = "macos") {
            Self {
                program: "say".to_string(),
                rate_flag: "-r",
                rate,
            }
        } else {
            Self {
                program: "espeak-ng".to_string(),
                rate_flag: "-s",
                rate,
            }
        }
    }

    /// The speaker if its program is installed.
    pub fn detect(rate: u32) -> Option<Self> {
        let speaker = Self::platform_default(rate);
        process::find_program(&speaker.program).map(|_| speaker)
    }
}

#[async_trait]
impl OfflineSpeaker for CommandSpeaker {
    async fn speak(&self, text: &str) -> Result<(), PlaybackError> {
        let rate = self.rate.to_string();
        process::run_with_timeout(&self.program, [self.rate_flag, rate.as_str(), text], PLAYER_TIMEOUT).await?;
        Ok(())
    }
}

/// Shared mute flag, checked at the moment each utterance would play.
#[derive(Debug, Clone, Default)]
pub struct MuteSwitch(Arc<AtomicBool>);

impl MuteSwitch {
    pub fn new(muted: bool) -> Self {
        Self(Arc::new(AtomicBool::new(muted)))
    }

    pub fn is_muted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_muted(&self, muted: bool) {
        self.0.store(muted, Ordering::SeqCst);
    }
}

/// What happened to one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Played,
    Muted,
    Failed,
}

/// Plays utterances; owned by the playback worker.
pub struct PlaybackStage {
    player: Arc<dyn AudioPlayer>,
    speaker: Option<Arc<dyn OfflineSpeaker>>,
    mute: MuteSwitch,
}

impl PlaybackStage {
    pub fn new(player: Arc<dyn AudioPlayer>, mute: MuteSwitch) -> Self {
        Self {
            player,
            speaker: None,
            mute,
        }
    }

    pub fn with_offline_speaker(mut self, speaker: Arc<dyn OfflineSpeaker>) -> Self {
        self.speaker = Some(speaker);
        self
    }

    pub fn has_offline_speaker(&self) -> bool {
        self.speaker.is_some()
    }

    pub fn mute_switch(&self) -> &MuteSwitch {
        &self.mute
    }

    /// Play one utterance to completion.
    pub async fn play(&self, utterance: Utterance) -> PlaybackOutcome {
        match utterance {
            Utterance::Audio(artifact) => {
                let outcome = if self.mute.is_muted() {
                    PlaybackOutcome::Muted
                } else {
                    match self.player.play(artifact.path()).await {
                        Ok(()) => PlaybackOutcome::Played,
                        Err(e) => {
                            tracing::warn!(path = %artifact.path().display(), error = %e, "playback failed");
                            PlaybackOutcome::Failed
                        }
                    }
                };
                artifact.remove().await;
                outcome
            }
            Utterance::Offline(text) => {
                if self.mute.is_muted() {
                    return PlaybackOutcome::Muted;
                }
                let Some(speaker) = &self.speaker else {
                    return PlaybackOutcome::Failed;
                };
                match speaker.speak(&text).await {
                    Ok(()) => PlaybackOutcome::Played,
                    Err(e) => {
                        tracing::warn!(error = %e, "offline speech failed");
                        PlaybackOutcome::Failed
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingPlayer, RecordingPlayer, RecordingSpeaker};
    use tempfile::TempDir;

    fn artifact(dir: &TempDir, name: &str) -> AudioArtifact {
        let path = dir.path().join(name);
        std::fs::write(&path, name).unwrap();
        AudioArtifact::new(path)
    }

    #[tokio::test]
    async fn test_plays_then_deletes() {
        let dir = TempDir::new().unwrap();
        let player = Arc::new(RecordingPlayer::new());
        let stage = PlaybackStage::new(player.clone(), MuteSwitch::new(false));

        let a = artifact(&dir, "a.mp3");
        let path = a.path().to_path_buf();
        assert_eq!(stage.play(Utterance::Audio(a)).await, PlaybackOutcome::Played);
        assert_eq!(player.played(), vec!["a.mp3".to_string()]);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_muted_still_deletes() {
        let dir = TempDir::new().unwrap();
        let player = Arc::new(RecordingPlayer::new());
        let stage = PlaybackStage::new(player.clone(), MuteSwitch::new(true));

        let a = artifact(&dir, "a.mp3");
        let path = a.path().to_path_buf();
        assert_eq!(stage.play(Utterance::Audio(a)).await, PlaybackOutcome::Muted);
        assert!(player.played().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_error_still_deletes() {
        let dir = TempDir::new().unwrap();
        let stage = PlaybackStage::new(Arc::new(FailingPlayer), MuteSwitch::new(false));

        let a = artifact(&dir, "a.mp3");
        let path = a.path().to_path_buf();
        assert_eq!(stage.play(Utterance::Audio(a)).await, PlaybackOutcome::Failed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_mute_is_read_at_call_time() {
        let speaker = Arc::new(RecordingSpeaker::new());
        let mute = MuteSwitch::new(false);
        let stage = PlaybackStage::new(Arc::new(RecordingPlayer::new()), mute.clone())
            .with_offline_speaker(speaker.clone());

        stage.play(Utterance::Offline("one".into())).await;
        mute.set_muted(true);
        stage.play(Utterance::Offline("two".into())).await;

        assert_eq!(speaker.spoken(), vec!["one".to_string()]);
    }

    #[test]
    fn test_platform_player() {
        let player = CommandPlayer::platform_default();
        if cfg!(target_os = "macos") {
            assert_eq!(player.program, "afplay");
        } else {
            assert_eq!(player.program, "ffplay");
            assert!(player.args.contains(&"-autoexit".to_string()));
        }
    }
}
