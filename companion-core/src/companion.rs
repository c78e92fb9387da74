//! Companion - the primary public API for a chat session.
//!
//! This module wraps the model client, profiles, history, relationship
//! tracking and the speech pipeline into a single session type. A turn is
//! driven by [`Companion::respond`], which streams the reply, hands the
//! visible text to a callback, queues speech as sentences complete and
//! persists the outcome.

use crate::actions::{AppLauncher, LaunchOutcome};
use crate::config::DataDirs;
use crate::history::{HistoryEntry, HistoryStore};
use crate::persist::PersistError;
use crate::pipeline::{PipelineError, SpeechPipeline, TurnCoordinator, TurnReport};
use crate::playback::{AudioPlayer, CommandSpeaker, MuteSwitch, PlaybackStage};
use crate::profile::{self, CharacterProfile, LoadedProfile, UserProfile};
use crate::prompt::{build_system_prompt, PromptContext};
use crate::relationship::{self, Obedience, RelationshipScore};
use crate::sentiment::extract_sentiment;
use crate::settings::{Settings, SettingsStore};
use crate::tts::{TcpConnectivity, TtsGenerator, VoiceSelector};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use futures::{Stream, StreamExt};
use ollama::{Message, Request};
use rand::seq::SliceRandom;
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// A stream of reply fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ollama::Error>> + Send>>;

/// Messages shown for the last few entries when recapping.
pub const RECAP_LENGTH: usize = 5;

/// Errors from Companion operations.
#[derive(Debug, Error)]
pub enum CompanionError {
    #[error("Model error: {0}")]
    Model(#[from] ollama::Error),

    #[error("Storage error: {0}")]
    Persist(#[from] PersistError),

    #[error("Speech error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// A streaming chat model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream_chat(&self, request: Request) -> Result<TextStream, ollama::Error>;
}

#[async_trait]
impl ChatModel for ollama::Ollama {
    async fn stream_chat(&self, request: Request) -> Result<TextStream, ollama::Error> {
        self.chat_text_stream(request).await
    }
}

/// What the outer interactive loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Restart,
    Exit,
}

/// A completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSummary {
    /// The reply with sentiment tags removed, as stored in history.
    pub reply: String,
    pub delta: i32,
    pub score: RelationshipScore,
    pub speech: TurnReport,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed(TurnSummary),
    /// The model failed; the message was shown in place of (or after) the reply.
    ModelError { message: String, speech: TurnReport },
    /// The user interrupted; nothing was persisted.
    Interrupted { speech: TurnReport },
}

/// Build the standard speech pipeline for `settings`.
pub fn speech_pipeline(dirs: &DataDirs, settings: &Settings, mute: MuteSwitch) -> SpeechPipeline {
    let generator = TtsGenerator::from_settings(settings, dirs.cache(), Arc::new(TcpConnectivity::default()));

    let player: Arc<dyn AudioPlayer> = default_player();
    let mut stage = PlaybackStage::new(player, mute);
    match CommandSpeaker::detect(settings.tts_rate) {
        Some(speaker) => stage = stage.with_offline_speaker(Arc::new(speaker)),
        None => tracing::debug!("no offline speaker installed"),
    }

    tracing::debug!(backends = ?generator.backend_names(), "speech pipeline configured");
    SpeechPipeline::new(Arc::new(generator), Arc::new(stage))
}

#[cfg(feature = "rodio")]
fn default_player() -> Arc<dyn AudioPlayer> {
    Arc::new(crate::playback::RodioPlayer)
}

#[cfg(not(feature = "rodio"))]
fn default_player() -> Arc<dyn AudioPlayer> {
    Arc::new(crate::playback::CommandPlayer::platform_default())
}

/// A chat session with one character.
pub struct Companion {
    model: Arc<dyn ChatModel>,
    settings: SettingsStore,
    history: HistoryStore,
    character: LoadedProfile<CharacterProfile>,
    user: Option<LoadedProfile<UserProfile>>,
    launcher: AppLauncher,
    /// Last interaction time that decay has already been applied for.
    decayed_for: Option<NaiveDateTime>,
}

impl Companion {
    pub fn new(
        dirs: &DataDirs,
        model: Arc<dyn ChatModel>,
        character: LoadedProfile<CharacterProfile>,
        user: Option<LoadedProfile<UserProfile>>,
    ) -> Self {
        Self {
            model,
            settings: dirs.settings_store(),
            history: dirs.history_store(),
            character,
            user,
            launcher: AppLauncher::default(),
            decayed_for: None,
        }
    }

    pub fn with_launcher(mut self, launcher: AppLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn character(&self) -> &CharacterProfile {
        &self.character.profile
    }

    pub fn character_path(&self) -> &std::path::Path {
        &self.character.path
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref().map(|u| &u.profile)
    }

    pub fn user_name(&self) -> &str {
        self.user().map(|u| u.name.as_str()).unwrap_or("User")
    }

    /// Key of this character's history file.
    pub fn history_key(&self) -> String {
        self.character.history_key()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn settings_store(&self) -> &SettingsStore {
        &self.settings
    }

    pub async fn settings(&self) -> Settings {
        self.settings.load().await
    }

    /// Re-read the profiles from disk so edits made between turns apply.
    pub async fn refresh(&mut self) -> Result<(), CompanionError> {
        self.character = profile::load_character(&self.character.path).await?;
        if let Some(user) = &self.user {
            self.user = Some(profile::load_user(&user.path).await?);
        }
        Ok(())
    }

    /// Pull the relationship score toward zero for the time since the last
    /// interaction. Applied at most once per recorded interaction.
    pub async fn apply_decay(&mut self) -> Result<RelationshipScore, CompanionError> {
        let current = self.character.profile.relationship_score;
        let Some(last) = self.history.last_interaction(&self.history_key()).await else {
            return Ok(current);
        };
        if self.decayed_for == Some(last) {
            return Ok(current);
        }

        let decayed = current.decay(Local::now().naive_local() - last);
        if decayed != current {
            profile::set_relationship_score(&self.character.path, decayed).await?;
            self.character.profile.relationship_score = decayed;
            tracing::info!(from = current.value(), to = decayed.value(), "relationship decayed");
        }
        self.decayed_for = Some(last);
        Ok(decayed)
    }

    /// With no history yet, pick a starter message and store it as the first
    /// assistant message.
    pub async fn starter_message<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Option<String>, CompanionError> {
        let key = self.history_key();
        if !self.history.load_document(&key).await.history.is_empty() {
            return Ok(None);
        }
        let Some(starter) = self.character.profile.starter_messages.choose(rng).cloned() else {
            return Ok(None);
        };

        self.history
            .save(
                &key,
                &[HistoryEntry::assistant(starter.clone())],
                self.character.profile.relationship_score.value(),
            )
            .await?;
        Ok(Some(starter))
    }

    /// The last few messages, for the startup recap.
    pub async fn recap(&self) -> Vec<HistoryEntry> {
        self.history.load(&self.history_key(), RECAP_LENGTH).await
    }

    /// Decide whether to obey when the input asks to launch something and
    /// launching is enabled. `None` for ordinary chat.
    pub fn decide_obedience<R: Rng + ?Sized>(&self, input: &str, settings: &Settings, rng: &mut R) -> Option<Obedience> {
        if !settings.execute_command || !self.launcher.is_command(input) {
            return None;
        }
        let profile = &self.character.profile;
        let decision =
            relationship::decide_obedience(rng, profile.relationship_score, profile.good_weight, profile.bad_weight);
        tracing::debug!(?decision, score = profile.relationship_score.value(), "obedience drawn");
        Some(decision)
    }

    pub fn launch(&self, input: &str) -> LaunchOutcome {
        self.launcher.launch(input)
    }

    /// System prompt, truncated history and the new user message.
    pub async fn prepare_request(&self, input: &str, obedience: Option<Obedience>, settings: &Settings) -> Request {
        let profile = &self.character.profile;
        let system = build_system_prompt(
            &PromptContext::new(profile)
                .with_user(self.user())
                .with_obedience(obedience),
        );

        let mut messages: Vec<Message> = self
            .history
            .load(&self.history_key(), settings.history_limit)
            .await
            .iter()
            .filter_map(HistoryEntry::to_message)
            .collect();
        messages.push(Message::user(input));

        Request::new(messages)
            .with_model(profile.model(&settings.default_llm_model))
            .with_system(system)
    }

    /// Apply the reply's sentiment and append the exchange to history.
    pub async fn complete_turn(&mut self, input: &str, raw_reply: &str) -> Result<(String, i32, RelationshipScore), CompanionError> {
        let sentiment = extract_sentiment(raw_reply);

        let score = if sentiment.delta != 0 {
            let score = profile::update_relationship_score(&self.character.path, sentiment.delta).await?;
            self.character.profile.relationship_score = score;
            tracing::info!(delta = sentiment.delta, score = score.value(), "relationship updated");
            score
        } else {
            self.character.profile.relationship_score
        };

        self.history
            .append(
                &self.history_key(),
                [HistoryEntry::user(input), HistoryEntry::assistant(sentiment.text.clone())],
                score.value(),
            )
            .await?;

        Ok((sentiment.text, sentiment.delta, score))
    }

    /// Run one turn.
    ///
    /// Visible text is passed to `on_text` as it streams in. When `pipeline`
    /// is given and speech is enabled, completed sentences are voiced in
    /// order and the call returns after the last one has played. If
    /// `interrupt` resolves first, queued speech still plays out and nothing
    /// is persisted.
    pub async fn respond<F, I>(
        &mut self,
        input: &str,
        obedience: Option<Obedience>,
        settings: &Settings,
        pipeline: Option<&mut SpeechPipeline>,
        mut on_text: F,
        interrupt: I,
    ) -> Result<TurnOutcome, CompanionError>
    where
        F: FnMut(&str),
        I: Future<Output = ()>,
    {
        let request = self.prepare_request(input, obedience, settings).await;
        let selector = VoiceSelector::new(&self.character.profile, settings);
        let turn = match pipeline {
            Some(pipeline) if settings.tts_enabled => Some(pipeline.start_turn().await),
            _ => None,
        };
        let mut coordinator = TurnCoordinator::new(selector, turn);
        tokio::pin!(interrupt);

        // Interrupts win over ready output.
        let started = tokio::select! {
            biased;
            _ = &mut interrupt => {
                let speech = coordinator.interrupt().await?;
                return Ok(TurnOutcome::Interrupted { speech });
            }
            started = self.model.stream_chat(request) => started,
        };
        let mut stream = match started {
            Ok(stream) => stream,
            Err(e) => return model_failure(coordinator, e, &mut on_text).await,
        };

        loop {
            tokio::select! {
                biased;
                _ = &mut interrupt => {
                    tracing::info!("turn interrupted");
                    let speech = coordinator.interrupt().await?;
                    return Ok(TurnOutcome::Interrupted { speech });
                }
                next = stream.next() => match next {
                    Some(Ok(fragment)) => {
                        let visible = coordinator.feed(&fragment).await?;
                        if !visible.is_empty() {
                            on_text(&visible);
                        }
                    }
                    Some(Err(e)) => return model_failure(coordinator, e, &mut on_text).await,
                    None => break,
                },
            }
        }

        let tail = coordinator.end_of_stream().await?;
        if !tail.is_empty() {
            on_text(&tail);
        }
        let raw = coordinator.raw_reply().to_string();
        let (reply, delta, score) = self.complete_turn(input, &raw).await?;
        let speech = coordinator.finish().await?;

        Ok(TurnOutcome::Completed(TurnSummary {
            reply,
            delta,
            score,
            speech,
        }))
    }
}

async fn model_failure<F: FnMut(&str)>(
    mut coordinator: TurnCoordinator<'_>,
    error: ollama::Error,
    on_text: &mut F,
) -> Result<TurnOutcome, CompanionError> {
    tracing::warn!(error = %error, "model request failed");
    let mut message = format!("Brain error: {error}. (Is Ollama running?)");
    if !coordinator.visible_reply().is_empty() {
        message.insert(0, '\n');
    }

    let mut visible = coordinator.feed(&message).await?;
    visible.push_str(&coordinator.end_of_stream().await?);
    on_text(&visible);
    let speech = coordinator.finish().await?;

    Ok(TurnOutcome::ModelError {
        message: message.trim().to_string(),
        speech,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedModel, ScriptedReply};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup(profile: serde_json::Value, replies: Vec<ScriptedReply>) -> (TempDir, Arc<ScriptedModel>, Companion) {
        let tmp = TempDir::new().unwrap();
        let dirs = DataDirs::new(tmp.path());
        dirs.ensure().await.unwrap();
        let path = dirs.profiles().join("luna.json");
        std::fs::write(&path, profile.to_string()).unwrap();

        let model = Arc::new(ScriptedModel::new(replies));
        let character = profile::load_character(&path).await.unwrap();
        let companion = Companion::new(&dirs, model.clone(), character, None);
        (tmp, model, companion)
    }

    #[tokio::test]
    async fn test_turn_applies_sentiment_and_saves_history() {
        let (_tmp, _model, mut companion) = setup(
            json!({"name": "Luna", "relationship_score": 10}),
            vec![ScriptedReply::fragments(&["Great", " job! [REL:", " +3]"])],
        )
        .await;
        let settings = Settings::default();

        let mut shown = String::new();
        let outcome = companion
            .respond("I fixed it", None, &settings, None, |t| shown.push_str(t), std::future::pending())
            .await
            .unwrap();

        let TurnOutcome::Completed(summary) = outcome else {
            panic!("expected a completed turn");
        };
        assert_eq!(summary.reply, "Great job!");
        assert_eq!(summary.delta, 3);
        assert_eq!(summary.score.value(), 13);
        assert_eq!(shown.trim(), "Great job!");

        let stored = profile::load_character(companion.character_path()).await.unwrap();
        assert_eq!(stored.profile.relationship_score.value(), 13);

        let history = companion.history().load("luna", 0).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Great job!");
    }

    #[tokio::test]
    async fn test_request_truncates_history() {
        let (_tmp, model, mut companion) = setup(
            json!({"name": "Luna"}),
            vec![ScriptedReply::fragments(&["ok"]), ScriptedReply::fragments(&["ok"])],
        )
        .await;
        let settings = Settings {
            history_limit: 2,
            ..Settings::default()
        };

        for input in ["one", "two"] {
            companion
                .respond(input, None, &settings, None, |_| {}, std::future::pending())
                .await
                .unwrap();
        }

        let requests = model.requests();
        assert_eq!(requests[0].messages.len(), 1);
        // Two stored messages plus the new user message.
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[1].messages[2].content, "two");
        assert!(requests[1].system.as_deref().unwrap_or_default().contains("[CHARACTER PROFILE]"));
        assert_eq!(requests[1].model.as_deref(), Some("llama3"));
    }

    #[tokio::test]
    async fn test_model_error_becomes_visible_message() {
        let (_tmp, _model, mut companion) = setup(json!({"name": "Luna"}), vec![ScriptedReply::Unreachable]).await;

        let mut shown = String::new();
        let outcome = companion
            .respond("hi", None, &Settings::default(), None, |t| shown.push_str(t), std::future::pending())
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::ModelError { .. }));
        assert!(shown.contains("Brain error"));
        assert!(shown.contains("(Is Ollama running?)"));
        assert!(companion.history().load("luna", 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_persists_nothing() {
        let (_tmp, _model, mut companion) =
            setup(json!({"name": "Luna"}), vec![ScriptedReply::fragments(&["never shown"])]).await;

        let outcome = companion
            .respond("hi", None, &Settings::default(), None, |_| {}, std::future::ready(()))
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Interrupted { .. }));
        assert!(companion.history().load("luna", 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_starter_message_only_without_history() {
        let (_tmp, _model, companion) =
            setup(json!({"name": "Luna", "starter_messages": ["*stretches* Oh. You."]}), vec![]).await;
        let mut rng = StdRng::seed_from_u64(1);

        let first = companion.starter_message(&mut rng).await.unwrap();
        assert_eq!(first.as_deref(), Some("*stretches* Oh. You."));
        assert_eq!(companion.starter_message(&mut rng).await.unwrap(), None);
        assert_eq!(companion.recap().await.len(), 1);
    }

    #[tokio::test]
    async fn test_obedience_only_for_enabled_commands() {
        let (_tmp, _model, companion) = setup(json!({"name": "Luna"}), vec![]).await;
        let mut rng = StdRng::seed_from_u64(3);
        let mut settings = Settings::default();

        assert_eq!(companion.decide_obedience("open the browser", &settings, &mut rng), None);
        settings.execute_command = true;
        assert_eq!(companion.decide_obedience("how are you?", &settings, &mut rng), None);
        assert!(companion.decide_obedience("open the browser", &settings, &mut rng).is_some());
    }

    #[tokio::test]
    async fn test_decay_applied_once_per_interaction() {
        let (tmp, _model, mut companion) = setup(json!({"name": "Luna", "relationship_score": 40}), vec![]).await;
        let history = tmp.path().join("history").join("luna_history.json");
        std::fs::write(
            &history,
            json!({
                "metadata": {"last_interaction": "2020-01-01 | 00:00:00", "mood_score": 40},
                "history": []
            })
            .to_string(),
        )
        .unwrap();

        let decayed = companion.apply_decay().await.unwrap();
        assert_eq!(decayed.value(), 0);
        let again = companion.apply_decay().await.unwrap();
        assert_eq!(again.value(), 0);

        let stored = profile::load_character(companion.character_path()).await.unwrap();
        assert_eq!(stored.profile.relationship_score.value(), 0);
    }
}
