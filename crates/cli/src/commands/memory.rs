//! `mentor memory`: Inspect what Mentor remembers.

use anyhow::Context;
use mentor_config::AppConfig;
use mentor_memory::{MemorySettings, PersistentMemory};

async fn open(user: &str) -> anyhow::Result<(AppConfig, PersistentMemory)> {
    let config = AppConfig::load().context("Failed to load config")?;
    let store = mentor_memory::build_store(&config.memory).await;
    let memory = PersistentMemory::new(
        user,
        "cli-inspect",
        store,
        MemorySettings::from(&config.memory),
    );
    Ok((config, memory))
}

pub async fn preferences(user: &str) -> anyhow::Result<()> {
    let (config, memory) = open(user).await?;

    println!("🧠 Preferences for {user}");
    println!("  Backend: {}", config.memory.backend);
    println!();

    let prefs = memory.get_preferences().await;
    if prefs.is_empty() {
        println!("  Nothing learned yet.");
    }
    for pref in prefs {
        println!(
            "  {:<18} {}  ({})",
            pref.category,
            pref.content,
            pref.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

pub async fn sessions(user: &str, limit: usize) -> anyhow::Result<()> {
    let (_, memory) = open(user).await?;

    println!("🗂  Recent sessions for {user}");
    println!();

    let sessions = memory.get_recent_sessions(limit).await;
    if sessions.is_empty() {
        println!("  No sessions recorded.");
    }
    for session in sessions {
        println!(
            "  {}  {}  [{}]",
            session.started_at.format("%Y-%m-%d %H:%M"),
            session.session_id,
            session.status.as_str()
        );
        if let Some(summary) = &session.summary {
            for line in summary.lines() {
                println!("      {line}");
            }
        }
    }

    Ok(())
}
