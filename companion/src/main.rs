//! Terminal desktop companion.
//!
//! Chat with a character profile over a local Ollama model. Replies stream
//! to the terminal and are spoken sentence by sentence as they arrive.
//!
//! ```bash
//! cargo run -p companion -- --home ~/companion
//! ```

mod app;
mod commands;
mod console;
mod picker;
mod render;
mod theme;

use companion_core::config::HOME_ENV;
use companion_core::{DataDirs, LoopControl};
use console::Console;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const NOISY_CRATES: &str = ",hyper=warn,reqwest=warn";

fn init_logging(debug_mode: bool) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(level) if !level.trim().is_empty() => format!("{level}{NOISY_CRATES}"),
        _ if debug_mode => format!("debug{NOISY_CRATES}"),
        _ => format!("warn{NOISY_CRATES}"),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn data_dirs(args: &[String]) -> Result<DataDirs, String> {
    match args.iter().position(|a| a == "--home") {
        Some(i) => args
            .get(i + 1)
            .map(DataDirs::new)
            .ok_or_else(|| "--home requires a directory".to_string()),
        None => Ok(DataDirs::from_env()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let dirs = match data_dirs(&args) {
        Ok(dirs) => dirs,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };
    dirs.ensure().await?;

    let settings = dirs.settings_store().load().await;
    init_logging(settings.debug_mode);
    tracing::info!(home = %dirs.root().display(), "starting");

    if settings.clear_at_start {
        console::clear_screen()?;
    }

    let mut console = Console::new();
    loop {
        match app::run(&mut console, &dirs).await {
            Ok(LoopControl::Restart) => {
                console::clear_screen()?;
            }
            Ok(LoopControl::Continue) => {}
            Ok(LoopControl::Exit) => {
                console::notice("\n[SYSTEM] Shutting down...");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "session failed");
                console::error(&format!("\n[CRITICAL ERROR] {e}"));
                break;
            }
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"Desktop Companion

USAGE:
    companion [OPTIONS]

OPTIONS:
    -h, --help          Show this help message
    --home <DIR>        Data directory (profiles/, user_profiles/, history/,
                        cache/, settings.json). Defaults to ${home_env} or
                        the current directory.

ENVIRONMENT:
    OLLAMA_HOST         Ollama server URL (overrides ollama_url in settings)
    RUST_LOG            Log filter, e.g. "debug" or "companion_core=trace"

Type //help at the prompt for the list of commands.
Press Ctrl+C while a reply is streaming to stop it, or at the prompt to quit.
"#,
        home_env = HOME_ENV
    );
}
