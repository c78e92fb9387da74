//! Live tests against a running Ollama server.
//!
//! Run with: `cargo test -p companion-core --test live_ollama -- --ignored --nocapture`
//!
//! These tests need a reachable server (`OLLAMA_HOST`, default
//! `http://localhost:11434`) with the model named in `OLLAMA_TEST_MODEL`
//! (default `llama3`) installed.

use companion_core::{profile, Companion, DataDirs, Settings, TurnOutcome};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn setup() {
    let _ = dotenvy::dotenv();
}

async fn server() -> Option<ollama::Ollama> {
    let model = std::env::var("OLLAMA_TEST_MODEL").unwrap_or_else(|_| "llama3".to_string());
    let client = ollama::Ollama::from_env().ok()?.with_model(model);
    match client.list_models().await {
        Ok(_) => Some(client),
        Err(e) => {
            eprintln!("Skipping test: {e}");
            None
        }
    }
}

#[tokio::test]
#[ignore]
async fn test_live_turn_is_persisted() {
    setup();
    let Some(client) = server().await else {
        return;
    };

    let tmp = TempDir::new().expect("Failed to create temp directory");
    let dirs = DataDirs::new(tmp.path());
    dirs.ensure().await.unwrap();
    let path = dirs.profiles().join("tester.json");
    std::fs::write(
        &path,
        json!({
            "name": "Tester",
            "system_prompt": "You are a terse assistant. Answer in one short sentence.",
            "llm_model": client.model()
        })
        .to_string(),
    )
    .unwrap();

    let character = profile::load_character(&path).await.unwrap();
    let mut companion = Companion::new(&dirs, Arc::new(client), character, None);

    let mut shown = String::new();
    let outcome = companion
        .respond(
            "Say hello.",
            None,
            &Settings::default(),
            None,
            |t| shown.push_str(t),
            std::future::pending(),
        )
        .await
        .unwrap();

    println!("{shown}");
    let TurnOutcome::Completed(summary) = outcome else {
        panic!("turn did not complete: {outcome:?}");
    };
    assert!(!summary.reply.is_empty());
    assert!(!summary.reply.contains("[REL:"));
    assert_eq!(companion.history().load("tester", 0).await.len(), 2);
}
