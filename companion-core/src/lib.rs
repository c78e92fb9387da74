//! Desktop companion engine: streamed replies, narration-aware speech and
//! relationship tracking.
//!
//! This crate provides:
//! - A per-turn speech pipeline that voices a streamed reply in order
//! - Narration-aware segmentation with separate character and narrator voices
//! - A content-addressed audio cache and an ordered synthesis fallback chain
//! - Character/user profiles, conversation history and relationship scores
//!
//! # Quick Start
//!
//! ```ignore
//! use companion_core::{profile, speech_pipeline, Companion, DataDirs, MuteSwitch};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dirs = DataDirs::from_env();
//!     let settings = dirs.settings_store().load().await;
//!     let model = ollama::Ollama::new(&settings.ollama_url)?;
//!     let character = profile::load_character(dirs.profiles().join("luna.json")).await?;
//!
//!     let mut companion = Companion::new(&dirs, Arc::new(model), character, None);
//!     let mut pipeline = speech_pipeline(&dirs, &settings, MuteSwitch::new(false));
//!
//!     companion
//!         .respond("Hi!", None, &settings, Some(&mut pipeline), |t| print!("{t}"), std::future::pending())
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod commands;
pub mod companion;
pub mod config;
pub mod history;
pub mod narration;
pub mod persist;
pub mod pipeline;
pub mod playback;
pub mod process;
pub mod profile;
pub mod prompt;
pub mod relationship;
pub mod segmenter;
pub mod sentiment;
pub mod settings;
pub mod testing;
pub mod tts;

// Primary public API
pub use actions::{AppLauncher, LaunchOutcome};
pub use commands::{AppCommand, UnknownCommand};
pub use companion::{
    speech_pipeline, ChatModel, Companion, CompanionError, LoopControl, TextStream, TurnOutcome, TurnSummary,
};
pub use config::DataDirs;
pub use history::{HistoryEntry, HistoryStore};
pub use narration::NarrationState;
pub use persist::PersistError;
pub use pipeline::{PipelineState, SpeechPipeline, TurnCoordinator, TurnReport};
pub use playback::{MuteSwitch, PlaybackStage, Utterance};
pub use profile::{CharacterProfile, LoadedProfile, UserProfile};
pub use relationship::{Obedience, RelationshipLabel, RelationshipScore};
pub use segmenter::{Segment, Segmenter};
pub use settings::{Settings, SettingsStore};
pub use tts::{Engine, TtsError, TtsGenerator, TtsJob};
