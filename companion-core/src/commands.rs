//! The `//` command table.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const COMMAND_PREFIX: &str = "//";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);

/// An internal command typed at the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppCommand {
    Help,
    Exit,
    Quit,
    Clear,
    ChangeCharacter,
    ChangeUserProfile,
    Reset,
    ResetAll,
    ResetRel,
    Restart,
    ToggleSpeak,
    ToggleNarration,
    ToggleCommand,
    ToggleClearAtStart,
    ShowSettings,
    ClearCache,
}

impl AppCommand {
    pub const ALL: [AppCommand; 16] = [
        AppCommand::Help,
        AppCommand::Exit,
        AppCommand::Quit,
        AppCommand::Clear,
        AppCommand::ChangeCharacter,
        AppCommand::ChangeUserProfile,
        AppCommand::Reset,
        AppCommand::ResetAll,
        AppCommand::ResetRel,
        AppCommand::Restart,
        AppCommand::ToggleSpeak,
        AppCommand::ToggleNarration,
        AppCommand::ToggleCommand,
        AppCommand::ToggleClearAtStart,
        AppCommand::ShowSettings,
        AppCommand::ClearCache,
    ];

    /// Whether `input` is meant as an internal command rather than chat.
    pub fn looks_like_command(input: &str) -> bool {
        input.trim_start().starts_with('/')
    }

    pub fn name(&self) -> &'static str {
        match self {
            AppCommand::Help => "help",
            AppCommand::Exit => "exit",
            AppCommand::Quit => "quit",
            AppCommand::Clear => "clear",
            AppCommand::ChangeCharacter => "change_character",
            AppCommand::ChangeUserProfile => "change_user_profile",
            AppCommand::Reset => "reset",
            AppCommand::ResetAll => "reset_all",
            AppCommand::ResetRel => "reset_rel",
            AppCommand::Restart => "restart",
            AppCommand::ToggleSpeak => "toggle_speak",
            AppCommand::ToggleNarration => "toggle_narration",
            AppCommand::ToggleCommand => "toggle_command",
            AppCommand::ToggleClearAtStart => "toggle_clear_at_start",
            AppCommand::ShowSettings => "show_settings",
            AppCommand::ClearCache => "clear_cache",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AppCommand::Help => "List available commands",
            AppCommand::Exit | AppCommand::Quit => "Leave the companion",
            AppCommand::Clear => "Clear the screen",
            AppCommand::ChangeCharacter => "Pick a different character",
            AppCommand::ChangeUserProfile => "Pick a different user profile",
            AppCommand::Reset => "Wipe one conversation history",
            AppCommand::ResetAll => "Wipe every conversation history",
            AppCommand::ResetRel => "Reset a character's relationship score to 0",
            AppCommand::Restart => "Restart the companion",
            AppCommand::ToggleSpeak => "Turn speech on or off",
            AppCommand::ToggleNarration => "Turn narration speech on or off",
            AppCommand::ToggleCommand => "Allow or forbid launching apps",
            AppCommand::ToggleClearAtStart => "Clear the screen at startup or not",
            AppCommand::ShowSettings => "Show current settings",
            AppCommand::ClearCache => "Delete all cached speech audio",
        }
    }
}

impl fmt::Display for AppCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", COMMAND_PREFIX, self.name())
    }
}

impl FromStr for AppCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim().to_lowercase();
        input
            .strip_prefix(COMMAND_PREFIX)
            .and_then(|name| AppCommand::ALL.into_iter().find(|c| c.name() == name))
            .ok_or_else(|| UnknownCommand(s.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("//HELP".parse::<AppCommand>(), Ok(AppCommand::Help));
        assert_eq!("  //Toggle_Speak ".parse::<AppCommand>(), Ok(AppCommand::ToggleSpeak));
    }

    #[test]
    fn test_unknown_commands() {
        assert_eq!("//dance".parse::<AppCommand>(), Err(UnknownCommand("//dance".to_string())));
        assert!("/help".parse::<AppCommand>().is_err());
        assert!("help".parse::<AppCommand>().is_err());
    }

    #[test]
    fn test_every_command_round_trips_through_display() {
        for command in AppCommand::ALL {
            assert_eq!(command.to_string().parse::<AppCommand>(), Ok(command));
        }
    }

    #[test]
    fn test_looks_like_command() {
        assert!(AppCommand::looks_like_command("/oops"));
        assert!(!AppCommand::looks_like_command("hi /there"));
    }
}
