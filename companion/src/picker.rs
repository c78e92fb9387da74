//! Numbered selection menus for profiles and history files.

use crate::console::{self, Console};
use companion_core::persist::display_name;
use companion_core::{profile, DataDirs};
use std::io;
use std::path::{Path, PathBuf};

async fn pick_from(console: &mut Console, title: &str, prompt: &str, files: &[PathBuf]) -> io::Result<Option<PathBuf>> {
    console::heading(&format!("\n--- {title} ---"));
    for (i, file) in files.iter().enumerate() {
        console::item(&format!("  [{}] {}", i + 1, display_name(file)));
    }

    let choice = console.read_choice(&format!("\n{prompt}: "), files.len()).await?;
    Ok(choice.map(|i| files[i].clone()))
}

async fn json_files(dir: &Path) -> Vec<PathBuf> {
    match profile::list_profiles(dir).await {
        Ok(files) => files,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "nothing to list");
            Vec::new()
        }
    }
}

/// Pick a character profile. Reports why when there is nothing to pick.
pub async fn pick_profile(console: &mut Console, dirs: &DataDirs) -> io::Result<Option<PathBuf>> {
    let dir = dirs.profiles();
    if !dir.is_dir() {
        console::error(&format!("[ERROR] Profiles directory '{}' not found.", dir.display()));
        return Ok(None);
    }
    let files = json_files(&dir).await;
    if files.is_empty() {
        console::error(&format!("[ERROR] No .json profiles found in '{}'.", dir.display()));
        return Ok(None);
    }

    pick_from(console, "Select Your Companion Profile", "Enter profile number", &files).await
}

/// Pick the character to talk to.
pub async fn pick_character(console: &mut Console, dirs: &DataDirs) -> io::Result<Option<PathBuf>> {
    let picked = pick_profile(console, dirs).await?;
    if let Some(path) = &picked {
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        console::success(&format!("Loading {name}...\n"));
    }
    Ok(picked)
}

/// Pick a user profile. `None` without asking when there are none.
pub async fn pick_user(console: &mut Console, dirs: &DataDirs) -> io::Result<Option<PathBuf>> {
    let files = json_files(&dirs.user_profiles()).await;
    if files.is_empty() {
        return Ok(None);
    }
    pick_from(console, "Select Your User Profile", "Enter user profile number", &files).await
}

/// Pick a conversation history file.
pub async fn pick_history(console: &mut Console, dirs: &DataDirs) -> io::Result<Option<PathBuf>> {
    let files = json_files(&dirs.history()).await;
    if files.is_empty() {
        return Ok(None);
    }
    pick_from(console, "Select Conversation History", "Enter history number", &files).await
}
