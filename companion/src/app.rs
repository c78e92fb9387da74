//! One session with a character: pick profiles, then chat until a command
//! asks for a restart or exit.

use crate::commands::{self, CommandContext};
use crate::console::{self, Console, Input};
use crate::picker;
use crate::render::{write_styled, ReplyPainter};
use crate::theme::{CharacterTheme, TextStyle};
use companion_core::settings::keys;
use companion_core::{
    profile, speech_pipeline, AppCommand, Companion, DataDirs, HistoryEntry, LoopControl, MuteSwitch, Obedience,
    TurnOutcome,
};
use crossterm::style::{Attribute, Color, Stylize};
use std::error::Error;
use std::io::{self, Stdout, Write};
use std::sync::Arc;

const USER_LABEL: TextStyle = TextStyle::new(Color::Cyan, &[Attribute::Bold]);
const ENGINE_TAG: TextStyle = TextStyle::new(Color::Cyan, &[]);

/// Resolves on Ctrl+C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

fn painter(companion: &Companion) -> ReplyPainter<Stdout> {
    let character = companion.character();
    ReplyPainter::new(
        io::stdout(),
        CharacterTheme::from_colors(&character.colors),
        character.narration_symbol,
    )
}

/// Print `[ENGINE] Name: ` before a reply.
fn reply_label(companion: &Companion, show_engine: bool) -> io::Result<()> {
    let mut out = io::stdout();
    let character = companion.character();
    if show_engine {
        write_styled(&mut out, &format!("{} ", character.tts_engine.tag()), ENGINE_TAG)?;
    }
    let theme = CharacterTheme::from_colors(&character.colors);
    write_styled(&mut out, &format!("{}: ", character.name), theme.name_label)?;
    out.flush()
}

fn show_message(companion: &Companion, text: &str) -> io::Result<()> {
    reply_label(companion, false)?;
    let mut painter = painter(companion);
    painter.write(text)?;
    painter.finish()?;
    Ok(())
}

async fn show_recap(companion: &Companion) -> io::Result<()> {
    let recap = companion.recap().await;
    if recap.is_empty() {
        return Ok(());
    }

    println!("{}", "=== Past Conversation ===".grey().attribute(Attribute::Dim));
    for entry in &recap {
        show_entry(companion, entry)?;
    }
    println!("{}", "=========================".grey().attribute(Attribute::Dim));
    Ok(())
}

fn show_entry(companion: &Companion, entry: &HistoryEntry) -> io::Result<()> {
    if entry.is_user() {
        let mut out = io::stdout();
        write_styled(&mut out, &format!("{}: ", companion.user_name()), USER_LABEL)?;
        writeln!(out, "{}", entry.content)
    } else {
        show_message(companion, &entry.content)
    }
}

/// Build a companion from the profile pickers. `None` when the user backs out.
async fn load_companion(console: &mut Console, dirs: &DataDirs) -> Result<Option<Companion>, Box<dyn Error>> {
    let store = dirs.settings_store();
    let settings = store.load().await;

    let Some(character_path) = picker::pick_character(console, dirs).await? else {
        return Ok(None);
    };
    let character = profile::load_character(&character_path).await?;
    store.set(keys::CURRENT_CHARACTER_PROFILE, character.file_name()).await?;

    let user = match picker::pick_user(console, dirs).await? {
        Some(path) => {
            let user = profile::load_user(&path).await?;
            store.set(keys::CURRENT_USER_PROFILE, user.file_name()).await?;
            Some(user)
        }
        None => None,
    };

    let host = std::env::var("OLLAMA_HOST").unwrap_or(settings.ollama_url);
    let model = ollama::Ollama::new(host)?;
    Ok(Some(Companion::new(dirs, Arc::new(model), character, user)))
}

/// Run one session.
pub async fn run(console: &mut Console, dirs: &DataDirs) -> Result<LoopControl, Box<dyn Error>> {
    let Some(mut companion) = load_companion(console, dirs).await? else {
        return Ok(LoopControl::Exit);
    };
    let settings = companion.settings().await;
    let mut rng = rand::thread_rng();

    console::heading(&format!("--- {} Desktop Companion Loaded ---", companion.character().name));
    console::notice("Type '//help' for a list of commands.\n");

    if settings.auto_recap_on_start {
        show_recap(&companion).await?;
    }
    if let Some(starter) = companion.starter_message(&mut rng).await? {
        console::divider();
        show_message(&companion, &starter)?;
        console::divider();
    }

    loop {
        if let Err(e) = companion.refresh().await {
            tracing::warn!(error = %e, "keeping previously loaded profiles");
        }
        if let Err(e) = companion.apply_decay().await {
            tracing::warn!(error = %e, "relationship decay not applied");
        }

        let label = format!("{}: ", companion.user_name());
        let input = match console.read_line(&label, USER_LABEL).await? {
            Input::Line(line) => line,
            Input::Interrupted | Input::Closed => return Ok(LoopControl::Exit),
        };
        if input.is_empty() {
            continue;
        }

        if AppCommand::looks_like_command(&input) {
            let control = match input.parse::<AppCommand>() {
                Ok(command) => {
                    let mut ctx = CommandContext {
                        console: &mut *console,
                        dirs,
                    };
                    commands::execute(command, &mut ctx).await.unwrap_or_else(|e| {
                        console::error(&format!("[ERROR] {e}"));
                        LoopControl::Continue
                    })
                }
                Err(_) => {
                    console::error("[SYSTEM] Unknown command. Type '//help' for a list of commands.");
                    LoopControl::Continue
                }
            };
            match control {
                LoopControl::Continue => continue,
                other => return Ok(other),
            }
        }

        let settings = companion.settings().await;
        let obedience = companion.decide_obedience(&input, &settings, &mut rng);
        if obedience == Some(Obedience::Obey) {
            console::success(&format!("[SYSTEM] {}", companion.launch(&input).message()));
        }

        // Rebuilt every turn so settings edits apply to the next reply.
        let mut pipeline = speech_pipeline(dirs, &settings, MuteSwitch::new(!settings.tts_enabled));

        console::divider();
        reply_label(&companion, settings.show_tts_engine)?;
        let mut painter = painter(&companion);
        painter.show_placeholder()?;

        let outcome = companion
            .respond(
                &input,
                obedience,
                &settings,
                Some(&mut pipeline),
                |text| {
                    if let Err(e) = painter.write(text) {
                        tracing::warn!(error = %e, "terminal write failed");
                    }
                },
                interrupted(),
            )
            .await;
        painter.finish()?;

        match outcome {
            Ok(TurnOutcome::Completed(summary)) => {
                tracing::debug!(
                    delta = summary.delta,
                    score = summary.score.value(),
                    played = summary.speech.played,
                    "turn complete"
                );
            }
            Ok(TurnOutcome::ModelError { .. }) => {}
            Ok(TurnOutcome::Interrupted { .. }) => console::notice("[SYSTEM] Interrupted."),
            Err(e) => console::error(&format!("\n[ERROR] {e}")),
        }
        console::divider();
    }
}
