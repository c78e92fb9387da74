//! Testing utilities for the companion engine.
//!
//! This module provides scripted stand-ins for every external collaborator:
//! - `ScriptedModel` and `scripted_stream` for deterministic replies without a server
//! - `ScriptedBackend` for synthesis chains without `edge-tts` or a GPU
//! - `RecordingPlayer` and `RecordingSpeaker` for asserting playback order
//! - `StaticConnectivity` for online/offline scenarios

use crate::companion::{ChatModel, TextStream};
use crate::playback::{AudioPlayer, OfflineSpeaker, PlaybackError};
use crate::tts::{Capability, SynthesisBackend, SynthesisRequest, TtsError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// A text stream yielding `fragments` in order.
pub fn scripted_stream<S: AsRef<str>>(fragments: &[S]) -> TextStream {
    let items: Vec<Result<String, ollama::Error>> =
        fragments.iter().map(|f| Ok(f.as_ref().to_string())).collect();
    Box::pin(futures::stream::iter(items))
}

/// A scripted reply from the mock model.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Stream these fragments.
    Fragments(Vec<String>),
    /// Stream these fragments, then fail mid-stream.
    Broken(Vec<String>),
    /// Refuse to start streaming.
    Unreachable,
}

impl ScriptedReply {
    pub fn fragments<S: AsRef<str>>(fragments: &[S]) -> Self {
        Self::Fragments(fragments.iter().map(|f| f.as_ref().to_string()).collect())
    }
}

/// A chat model that returns scripted replies in order.
///
/// Use this for deterministic turn tests without an Ollama server. Every
/// request is recorded so tests can inspect the prompt that was sent.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ollama::Request>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue another reply.
    pub fn queue(&self, reply: ScriptedReply) {
        lock(&self.replies).push_back(reply);
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ollama::Request> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_chat(&self, request: ollama::Request) -> Result<TextStream, ollama::Error> {
        lock(&self.requests).push(request);
        match lock(&self.replies).pop_front() {
            Some(ScriptedReply::Fragments(fragments)) => Ok(scripted_stream(&fragments)),
            Some(ScriptedReply::Broken(fragments)) => {
                let mut items: Vec<Result<String, ollama::Error>> = fragments.into_iter().map(Ok).collect();
                items.push(Err(ollama::Error::Network("connection reset".to_string())));
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Some(ScriptedReply::Unreachable) | None => {
                Err(ollama::Error::NoServer("http://localhost:11434".to_string()))
            }
        }
    }
}

#[derive(Debug, Clone)]
enum BackendScript {
    Succeed(Vec<u8>),
    Echo,
    Fail,
}

/// A synthesis backend with a fixed behavior that records every request.
#[derive(Debug)]
pub struct ScriptedBackend {
    name: String,
    capability: Capability,
    script: BackendScript,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(name: &str, capability: Capability, script: BackendScript) -> Self {
        Self {
            name: name.to_string(),
            capability,
            script,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always writes `bytes`.
    pub fn succeeding(name: &str, capability: Capability, bytes: &[u8]) -> Self {
        Self::new(name, capability, BackendScript::Succeed(bytes.to_vec()))
    }

    /// Writes the request text as the audio payload.
    pub fn echoing(name: &str, capability: Capability) -> Self {
        Self::new(name, capability, BackendScript::Echo)
    }

    /// Always fails.
    pub fn failing(name: &str, capability: Capability) -> Self {
        Self::new(name, capability, BackendScript::Fail)
    }

    /// Sleep before answering, to simulate slow synthesis.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Texts this backend was asked to synthesize.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl SynthesisBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    async fn synthesize(&self, request: &SynthesisRequest<'_>, out: &Path) -> Result<(), TtsError> {
        lock(&self.calls).push(request.text.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            BackendScript::Succeed(bytes) => Ok(tokio::fs::write(out, bytes).await?),
            BackendScript::Echo => Ok(tokio::fs::write(out, request.text.as_bytes()).await?),
            BackendScript::Fail => Err(TtsError::Backend {
                backend: self.name.clone(),
                message: "scripted failure".to_string(),
            }),
        }
    }
}

/// A player that records the contents of each file it plays.
#[derive(Debug, Default)]
pub struct RecordingPlayer {
    played: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl RecordingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take this long to "play" each file.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Contents of the played files, in playback order.
    pub fn played(&self) -> Vec<String> {
        lock(&self.played).clone()
    }
}

#[async_trait]
impl AudioPlayer for RecordingPlayer {
    async fn play(&self, path: &Path) -> Result<(), PlaybackError> {
        let bytes = tokio::fs::read(path).await?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.played).push(String::from_utf8_lossy(&bytes).into_owned());
        Ok(())
    }
}

/// A player whose device is always broken.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingPlayer;

#[async_trait]
impl AudioPlayer for FailingPlayer {
    async fn play(&self, _path: &Path) -> Result<(), PlaybackError> {
        Err(PlaybackError::Device("no output device".to_string()))
    }
}

/// An offline speaker that records what it said.
#[derive(Debug, Default)]
pub struct RecordingSpeaker {
    spoken: Mutex<Vec<String>>,
}

impl RecordingSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).clone()
    }
}

#[async_trait]
impl OfflineSpeaker for RecordingSpeaker {
    async fn speak(&self, text: &str) -> Result<(), PlaybackError> {
        lock(&self.spoken).push(text.to_string());
        Ok(())
    }
}

/// Fixed connectivity answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticConnectivity(pub bool);

#[async_trait]
impl crate::tts::Connectivity for StaticConnectivity {
    async fn is_online(&self) -> bool {
        self.0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
