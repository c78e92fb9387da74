//! Per-turn speech pipeline.
//!
//! ```text
//! segments ──► generation queue ──► generation worker ──► playback queue ──► playback worker
//! ```
//!
//! Both queues are bounded FIFO channels and each worker finishes one item
//! before taking the next, so audio plays in exactly the order text was
//! produced. A turn ends with a `Shutdown` message: the generation worker
//! forwards it to the playback queue and exits, and the playback worker
//! exits once it has played everything queued before it. A closed channel is
//! treated the same way.
//!
//! The lifecycle is `Idle → Running → Draining → Idle`. A [`RunningTurn`]
//! borrows the pipeline mutably, so a new turn cannot start until the
//! previous one has drained.

use crate::playback::{PlaybackOutcome, PlaybackStage, Utterance};
use crate::segmenter::{Segment, Segmenter};
use crate::sentiment::TagFilter;
use crate::tts::{TtsError, TtsGenerator, TtsJob, VoiceSelector};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default capacity of each queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("speech pipeline closed")]
    Closed,

    #[error("speech worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
}

#[derive(Debug)]
enum GenerationMessage {
    Job(TtsJob),
    Shutdown,
}

#[derive(Debug)]
enum PlaybackMessage {
    Play(Utterance),
    Shutdown,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct GenerationReport {
    synthesized: usize,
    offline: usize,
    skipped: usize,
    failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PlaybackReport {
    played: usize,
    muted: usize,
    failed: usize,
}

/// What happened during one turn.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TurnReport {
    pub submitted: usize,
    /// Jobs that produced audio (fresh or cached).
    pub synthesized: usize,
    /// Jobs handed to the offline speaker after every backend failed.
    pub offline: usize,
    /// Jobs with nothing speakable.
    pub skipped: usize,
    /// Jobs that produced no speech at all.
    pub failed: usize,
    pub played: usize,
    pub muted: usize,
    pub playback_failed: usize,
    pub cancelled: bool,
}

type Workers = (JoinHandle<GenerationReport>, JoinHandle<PlaybackReport>);

/// Owns the stages and starts one [`RunningTurn`] at a time.
pub struct SpeechPipeline {
    generator: Arc<TtsGenerator>,
    playback: Arc<PlaybackStage>,
    capacity: usize,
    state: PipelineState,
    /// Workers of a turn that was dropped without being finished.
    orphaned: Option<Workers>,
}

impl SpeechPipeline {
    pub fn new(generator: Arc<TtsGenerator>, playback: Arc<PlaybackStage>) -> Self {
        Self {
            generator,
            playback,
            capacity: DEFAULT_QUEUE_CAPACITY,
            state: PipelineState::Idle,
            orphaned: None,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn generator(&self) -> &TtsGenerator {
        &self.generator
    }

    pub fn playback(&self) -> &PlaybackStage {
        &self.playback
    }

    /// Spawn the workers for a new turn.
    ///
    /// If the previous turn was dropped without finishing, its workers are
    /// drained first.
    pub async fn start_turn(&mut self) -> RunningTurn<'_> {
        if let Some((generation, playback)) = self.orphaned.take() {
            tracing::debug!("draining workers from an abandoned turn");
            let _ = generation.await;
            let _ = playback.await;
        }

        let (job_tx, job_rx) = mpsc::channel(self.capacity);
        let (audio_tx, audio_rx) = mpsc::channel(self.capacity);

        let offline_fallback = self.playback.has_offline_speaker();
        let generation = tokio::spawn(generation_worker(
            self.generator.clone(),
            offline_fallback,
            job_rx,
            audio_tx,
        ));
        let playback = tokio::spawn(playback_worker(self.playback.clone(), audio_rx));

        self.state = PipelineState::Running;
        tracing::debug!("speech pipeline running");

        RunningTurn {
            pipeline: self,
            jobs: job_tx,
            workers: Some((generation, playback)),
            submitted: 0,
        }
    }
}

/// A turn in progress. Finish it with [`RunningTurn::finish`] or
/// [`RunningTurn::cancel`].
pub struct RunningTurn<'a> {
    pipeline: &'a mut SpeechPipeline,
    jobs: mpsc::Sender<GenerationMessage>,
    workers: Option<Workers>,
    submitted: usize,
}

impl RunningTurn<'_> {
    /// Queue a job behind everything already submitted.
    pub async fn submit(&mut self, job: TtsJob) -> Result<(), PipelineError> {
        self.jobs
            .send(GenerationMessage::Job(job))
            .await
            .map_err(|_| PipelineError::Closed)?;
        self.submitted += 1;
        Ok(())
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// End of stream: play out everything submitted, then stop.
    pub async fn finish(self) -> Result<TurnReport, PipelineError> {
        self.shutdown(false).await
    }

    /// Stop taking segments now. Jobs already queued still play out.
    pub async fn cancel(self) -> Result<TurnReport, PipelineError> {
        self.shutdown(true).await
    }

    async fn shutdown(mut self, cancelled: bool) -> Result<TurnReport, PipelineError> {
        // A closed queue means the worker already exited; joining reports why.
        let _ = self.jobs.send(GenerationMessage::Shutdown).await;
        self.pipeline.state = PipelineState::Draining;

        let (generation, playback) = self
            .workers
            .take()
            .ok_or_else(|| PipelineError::Worker("workers already joined".to_string()))?;
        let generation = generation.await;
        let playback = playback.await;
        self.pipeline.state = PipelineState::Idle;
        tracing::debug!("speech pipeline drained");

        let generation = generation.map_err(|e| PipelineError::Worker(e.to_string()))?;
        let playback = playback.map_err(|e| PipelineError::Worker(e.to_string()))?;

        Ok(TurnReport {
            submitted: self.submitted,
            synthesized: generation.synthesized,
            offline: generation.offline,
            skipped: generation.skipped,
            failed: generation.failed,
            played: playback.played,
            muted: playback.muted,
            playback_failed: playback.failed,
            cancelled,
        })
    }
}

impl Drop for RunningTurn<'_> {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.take() {
            // The sender closes as we drop, which shuts the workers down.
            tracing::warn!("speech turn dropped without finishing");
            self.pipeline.orphaned = Some(workers);
            self.pipeline.state = PipelineState::Idle;
        }
    }
}

async fn generation_worker(
    generator: Arc<TtsGenerator>,
    offline_fallback: bool,
    mut jobs: mpsc::Receiver<GenerationMessage>,
    audio: mpsc::Sender<PlaybackMessage>,
) -> GenerationReport {
    let mut report = GenerationReport::default();
    tracing::debug!("generation worker started");

    while let Some(GenerationMessage::Job(job)) = jobs.recv().await {
        let utterance = match generator.generate(&job).await {
            Ok(artifact) => {
                report.synthesized += 1;
                Utterance::Audio(artifact)
            }
            Err(TtsError::NothingToSpeak) => {
                report.skipped += 1;
                continue;
            }
            Err(e) if offline_fallback => {
                tracing::info!(error = %e, "falling back to offline speech");
                report.offline += 1;
                Utterance::Offline(job.text.clone())
            }
            Err(e) => {
                tracing::warn!(error = %e, "no speech for segment");
                report.failed += 1;
                continue;
            }
        };

        if let Err(mpsc::error::SendError(unsent)) = audio.send(PlaybackMessage::Play(utterance)).await {
            if let PlaybackMessage::Play(Utterance::Audio(artifact)) = unsent {
                artifact.remove().await;
            }
            break;
        }
    }

    let _ = audio.send(PlaybackMessage::Shutdown).await;
    tracing::debug!("generation worker exited");
    report
}

async fn playback_worker(stage: Arc<PlaybackStage>, mut audio: mpsc::Receiver<PlaybackMessage>) -> PlaybackReport {
    let mut report = PlaybackReport::default();
    tracing::debug!("playback worker started");

    while let Some(PlaybackMessage::Play(utterance)) = audio.recv().await {
        match stage.play(utterance).await {
            PlaybackOutcome::Played => report.played += 1,
            PlaybackOutcome::Muted => report.muted += 1,
            PlaybackOutcome::Failed => report.failed += 1,
        }
    }

    tracing::debug!("playback worker exited");
    report
}

/// Drives one turn from streamed fragments to queued speech.
///
/// Fragments pass through the sentiment tag filter, then the segmenter;
/// each finished segment is turned into a job in the right voice and
/// submitted. Without a running turn (speech disabled) text is still
/// filtered and segmented but nothing is voiced.
pub struct TurnCoordinator<'a> {
    filter: TagFilter,
    segmenter: Segmenter,
    selector: VoiceSelector,
    turn: Option<RunningTurn<'a>>,
    raw: String,
    ended: bool,
}

impl<'a> TurnCoordinator<'a> {
    pub fn new(selector: VoiceSelector, turn: Option<RunningTurn<'a>>) -> Self {
        Self {
            filter: TagFilter::new(),
            segmenter: Segmenter::new(selector.symbol),
            selector,
            turn,
            raw: String::new(),
            ended: false,
        }
    }

    /// Feed a streamed fragment; returns the text safe to display.
    pub async fn feed(&mut self, fragment: &str) -> Result<String, PipelineError> {
        self.raw.push_str(fragment);
        let visible = self.filter.push(fragment);
        let segments = self.segmenter.push(&visible);
        self.submit_all(segments).await?;
        Ok(visible)
    }

    /// End of stream: flush held-back text and remaining segments.
    ///
    /// Returns any text that still needs displaying.
    pub async fn end_of_stream(&mut self) -> Result<String, PipelineError> {
        if self.ended {
            return Ok(String::new());
        }
        self.ended = true;

        let tail = self.filter.finish();
        let mut segments = self.segmenter.push(&tail);
        segments.extend(self.segmenter.finish());
        self.submit_all(segments).await?;
        Ok(tail)
    }

    /// Everything the model sent, tags included.
    pub fn raw_reply(&self) -> &str {
        &self.raw
    }

    /// The reply as displayed.
    pub fn visible_reply(&self) -> &str {
        self.segmenter.text()
    }

    /// Flush and wait for all speech to play out.
    pub async fn finish(mut self) -> Result<TurnReport, PipelineError> {
        self.end_of_stream().await?;
        match self.turn.take() {
            Some(turn) => turn.finish().await,
            None => Ok(TurnReport::default()),
        }
    }

    /// Abandon the rest of the reply. Speech already queued still plays.
    pub async fn interrupt(mut self) -> Result<TurnReport, PipelineError> {
        match self.turn.take() {
            Some(turn) => turn.cancel().await,
            None => Ok(TurnReport {
                cancelled: true,
                ..TurnReport::default()
            }),
        }
    }

    async fn submit_all(&mut self, segments: Vec<Segment>) -> Result<(), PipelineError> {
        let Some(turn) = self.turn.as_mut() else {
            return Ok(());
        };
        for segment in segments {
            if let Some(job) = self.selector.job_for(&segment) {
                turn.submit(job).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::MuteSwitch;
    use crate::testing::{RecordingPlayer, ScriptedBackend};
    use crate::tts::{Capability, Engine, TtsCache};
    use tempfile::TempDir;

    fn job(text: &str) -> TtsJob {
        TtsJob {
            text: text.to_string(),
            voice: None,
            engine: Engine::EdgeTts,
            clone_ref: None,
            language: "en".to_string(),
        }
    }

    fn pipeline(dir: &TempDir, player: Arc<RecordingPlayer>) -> SpeechPipeline {
        let generator = TtsGenerator::new(TtsCache::new(dir.path().join("cache")), "voice")
            .with_scratch_dir(dir.path())
            .with_backend(Arc::new(ScriptedBackend::echoing("edge", Capability::NeuralVoice)));
        let stage = PlaybackStage::new(player, MuteSwitch::new(false));
        SpeechPipeline::new(Arc::new(generator), Arc::new(stage)).with_capacity(2)
    }

    #[tokio::test]
    async fn test_state_machine() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = pipeline(&dir, Arc::new(RecordingPlayer::new()));
        assert_eq!(pipeline.state(), PipelineState::Idle);

        let turn = pipeline.start_turn().await;
        let report = turn.finish().await.unwrap();
        assert_eq!(report, TurnReport::default());
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_plays_in_submission_order() {
        let dir = TempDir::new().unwrap();
        let player = Arc::new(RecordingPlayer::new());
        let mut pipeline = pipeline(&dir, player.clone());

        let mut turn = pipeline.start_turn().await;
        assert_eq!(pipeline_state_of(&turn), PipelineState::Running);
        for text in ["One.", "Two.", "Three.", "Four.", "Five."] {
            turn.submit(job(text)).await.unwrap();
        }
        let report = turn.finish().await.unwrap();

        assert_eq!(report.submitted, 5);
        assert_eq!(report.played, 5);
        assert_eq!(player.played(), vec!["One.", "Two.", "Three.", "Four.", "Five."]);
    }

    fn pipeline_state_of(turn: &RunningTurn<'_>) -> PipelineState {
        turn.pipeline.state
    }

    #[tokio::test]
    async fn test_cancel_still_plays_queued_jobs() {
        let dir = TempDir::new().unwrap();
        let player = Arc::new(RecordingPlayer::new());
        let mut pipeline = pipeline(&dir, player.clone());

        let mut turn = pipeline.start_turn().await;
        turn.submit(job("Already queued.")).await.unwrap();
        let report = turn.cancel().await.unwrap();

        assert!(report.cancelled);
        assert_eq!(player.played(), vec!["Already queued."]);
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_dropped_turn_drains_before_next() {
        let dir = TempDir::new().unwrap();
        let player = Arc::new(RecordingPlayer::new());
        let mut pipeline = pipeline(&dir, player.clone());

        {
            let mut turn = pipeline.start_turn().await;
            turn.submit(job("Left behind.")).await.unwrap();
        }
        let mut turn = pipeline.start_turn().await;
        turn.submit(job("Next turn.")).await.unwrap();
        turn.finish().await.unwrap();

        assert_eq!(player.played(), vec!["Left behind.", "Next turn."]);
    }
}
