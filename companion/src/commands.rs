//! Handlers for the `//` commands.

use crate::console::{self, Console};
use crate::picker;
use companion_core::history::reset_file;
use companion_core::settings::keys;
use companion_core::{profile, AppCommand, DataDirs, LoopControl, RelationshipScore};
use crossterm::style::Stylize;
use serde_json::Value;
use std::error::Error;

/// What a command needs from the running session.
pub struct CommandContext<'a> {
    pub console: &'a mut Console,
    pub dirs: &'a DataDirs,
}

/// Flip a boolean setting and report the new state.
async fn toggle(ctx: &CommandContext<'_>, key: &str, default: bool, on: &str, off: &str) -> Result<bool, Box<dyn Error>> {
    let enabled = ctx.dirs.settings_store().toggle(key, default).await?;
    if enabled {
        console::success(&format!("[SYSTEM] {on}"));
    } else {
        console::error(&format!("[SYSTEM] {off}"));
    }
    Ok(enabled)
}

fn show_help() {
    console::notice("[AVAILABLE COMMANDS]");
    for command in AppCommand::ALL {
        println!("  {} {}", format!("{:<24}", command.to_string()).cyan(), command.description());
    }
}

async fn show_settings(dirs: &DataDirs) {
    console::notice("[CURRENT SETTINGS]");
    for (key, value) in dirs.settings_store().load_raw().await {
        let value = match value {
            Value::Bool(true) => "true".green().to_string(),
            Value::Bool(false) => "false".red().to_string(),
            Value::String(s) => s,
            other => other.to_string(),
        };
        println!("  {} {value}", format!("{key}:").cyan());
    }
}

/// Run `command`. Errors are reported by the caller and leave the session running.
pub async fn execute(command: AppCommand, ctx: &mut CommandContext<'_>) -> Result<LoopControl, Box<dyn Error>> {
    tracing::debug!(%command, "running command");
    match command {
        AppCommand::Help => show_help(),
        AppCommand::Exit | AppCommand::Quit => return Ok(LoopControl::Exit),
        AppCommand::Clear => {
            console::clear_screen()?;
            console::notice("[SYSTEM] Screen cleared.");
        }
        AppCommand::ChangeCharacter => {
            console::notice("[SYSTEM] Changing character...");
            return Ok(LoopControl::Restart);
        }
        AppCommand::ChangeUserProfile => {
            console::notice("[SYSTEM] Changing user profile.");
            match picker::pick_user(ctx.console, ctx.dirs).await? {
                Some(path) => {
                    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                    ctx.dirs.settings_store().set(keys::CURRENT_USER_PROFILE, &name).await?;
                    console::success(&format!("[SYSTEM] User profile changed to {name}. Restarting..."));
                    return Ok(LoopControl::Restart);
                }
                None => console::error("[SYSTEM] No user profile selected."),
            }
        }
        AppCommand::Reset => match picker::pick_history(ctx.console, ctx.dirs).await? {
            Some(path) => {
                reset_file(&path).await?;
                console::success("[SYSTEM] History cleared.");
            }
            None => console::error("[SYSTEM] No history selected."),
        },
        AppCommand::ResetAll => {
            if ctx.console.confirm("Are you sure you want to reset ALL history files?").await? {
                let wiped = ctx.dirs.history_store().reset_all().await?;
                console::success(&format!("[SYSTEM] All history files have been wiped ({wiped})."));
            } else {
                console::notice("[SYSTEM] Reset cancelled.");
            }
        }
        AppCommand::ResetRel => match picker::pick_profile(ctx.console, ctx.dirs).await? {
            Some(path) => {
                profile::set_relationship_score(&path, RelationshipScore::default()).await?;
                console::success("[SYSTEM] Relationship score reset to 0.");
            }
            None => console::error("[SYSTEM] No profile selected."),
        },
        AppCommand::Restart => {
            console::notice("[SYSTEM] Restarting application...");
            return Ok(LoopControl::Restart);
        }
        AppCommand::ToggleSpeak => {
            toggle(ctx, keys::TTS_ENABLED, true, "Text-to-Speech enabled.", "Text-to-Speech disabled.").await?;
        }
        AppCommand::ToggleNarration => {
            toggle(ctx, keys::SPEAK_NARRATION, true, "Narration enabled.", "Narration disabled.").await?;
        }
        AppCommand::ToggleCommand => {
            toggle(ctx, keys::EXECUTE_COMMAND, false, "Command execution enabled.", "Command execution disabled.").await?;
        }
        AppCommand::ToggleClearAtStart => {
            toggle(
                ctx,
                keys::CLEAR_AT_START,
                true,
                "Console will now clear at startup.",
                "Console will no longer clear at startup.",
            )
            .await?;
        }
        AppCommand::ShowSettings => show_settings(ctx.dirs).await,
        AppCommand::ClearCache => {
            let removed = ctx.dirs.cache().clear().await?;
            console::success(&format!("[SYSTEM] Removed {removed} cached audio clips."));
        }
    }
    Ok(LoopControl::Continue)
}
