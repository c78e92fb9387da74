//! Launching desktop apps the user asks for.

use crate::process::{self, CommandError};

/// A keyword and the program it launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEntry {
    pub keyword: String,
    pub program: String,
    pub args: Vec<String>,
}

impl AppEntry {
    pub fn new(keyword: &str, program: &str, args: &[&str]) -> Self {
        Self {
            keyword: keyword.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Result of a launch attempt, phrased for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Launched { keyword: String },
    Failed { keyword: String, reason: String },
    NoMatch,
}

impl LaunchOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, LaunchOutcome::Launched { .. })
    }

    pub fn message(&self) -> String {
        match self {
            LaunchOutcome::Launched { keyword } => format!("Launching {keyword}..."),
            LaunchOutcome::Failed { keyword, reason } => {
                format!("I tried to open {keyword}, but I failed. (Error: {reason})")
            }
            LaunchOutcome::NoMatch => {
                "I have no idea what you want me to open. Try being more specific?".to_string()
            }
        }
    }
}

/// Keyword table mapping requests like "open the browser" to programs.
#[derive(Debug, Clone)]
pub struct AppLauncher {
    apps: Vec<AppEntry>,
}

impl Default for AppLauncher {
    fn default() -> Self {
        let apps = if cfg!(windows) {
            vec![
                AppEntry::new("browser", "cmd", &["/C", "start", "chrome"]),
                AppEntry::new("notepad", "notepad.exe", &[]),
                AppEntry::new("calculator", "calc.exe", &[]),
                AppEntry::new("discord", "cmd", &["/C", "start", "discord:"]),
            ]
        } else if cfg!(target_os = "macos") {
            vec![
                AppEntry::new("browser", "open", &["-a", "Safari"]),
                AppEntry::new("notepad", "open", &["-a", "TextEdit"]),
                AppEntry::new("calculator", "open", &["-a", "Calculator"]),
                AppEntry::new("discord", "open", &["-a", "Discord"]),
            ]
        } else {
            vec![
                AppEntry::new("browser", "xdg-open", &["https://"]),
                AppEntry::new("notepad", "gedit", &[]),
                AppEntry::new("calculator", "gnome-calculator", &[]),
                AppEntry::new("discord", "discord", &[]),
            ]
        };
        Self { apps }
    }
}

impl AppLauncher {
    pub fn new(apps: Vec<AppEntry>) -> Self {
        Self { apps }
    }

    pub fn apps(&self) -> &[AppEntry] {
        &self.apps
    }

    /// Whether the input asks to open something.
    pub fn is_command(&self, input: &str) -> bool {
        let input = input.to_lowercase();
        input.contains("open") || self.apps.iter().any(|app| input.contains(&app.keyword))
    }

    /// The first entry whose keyword appears in `input`.
    pub fn find(&self, input: &str) -> Option<&AppEntry> {
        let input = input.to_lowercase();
        self.apps.iter().find(|app| input.contains(&app.keyword))
    }

    /// Launch the matching app without waiting for it.
    pub fn launch(&self, input: &str) -> LaunchOutcome {
        let Some(app) = self.find(input) else {
            return LaunchOutcome::NoMatch;
        };

        match process::spawn_detached(&app.program, &app.args) {
            Ok(()) => {
                tracing::info!(keyword = %app.keyword, program = %app.program, "launched app");
                LaunchOutcome::Launched {
                    keyword: app.keyword.clone(),
                }
            }
            Err(e) => {
                tracing::warn!(keyword = %app.keyword, error = %e, "app launch failed");
                LaunchOutcome::Failed {
                    keyword: app.keyword.clone(),
                    reason: match e {
                        CommandError::NotFound { program } => format!("{program} not found"),
                        other => other.to_string(),
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_command() {
        let launcher = AppLauncher::default();
        assert!(launcher.is_command("Could you OPEN something for me"));
        assert!(launcher.is_command("fire up the calculator"));
        assert!(!launcher.is_command("how was your day?"));
    }

    #[test]
    fn test_no_match() {
        let launcher = AppLauncher::default();
        let outcome = launcher.launch("open the pod bay doors");
        assert_eq!(outcome, LaunchOutcome::NoMatch);
        assert!(outcome.message().contains("no idea"));
    }

    #[test]
    fn test_missing_program_fails_gracefully() {
        let launcher = AppLauncher::new(vec![AppEntry::new("browser", "definitely-not-a-real-program-xyz", &[])]);
        let outcome = launcher.launch("open browser");
        assert!(!outcome.succeeded());
        assert!(matches!(outcome, LaunchOutcome::Failed { ref keyword, .. } if keyword == "browser"));
    }
}
