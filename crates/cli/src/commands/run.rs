//! `mentor run`: Plan and execute one teacher request.

use anyhow::Context;
use mentor_agent::{Orchestrator, TurnReport};
use mentor_capabilities::{ActivityStore, default_registry};
use mentor_config::AppConfig;
use mentor_core::Reasoner;
use mentor_providers::{CascadeReasoner, SamplingSettings, build_from_config, is_usable};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

pub async fn run(
    request: &str,
    user: &str,
    session: Option<String>,
    offline: bool,
    json: bool,
) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;

    let offline = if !offline && !is_usable(&config) {
        eprintln!();
        eprintln!("  No API key configured, running offline.");
        eprintln!("  Set MENTOR_API_KEY or OPENROUTER_API_KEY, or add it to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        true
    } else {
        offline
    };

    // An empty cascade fails every call, so comprehension falls back locally.
    let reasoner: Arc<dyn Reasoner> = if offline {
        Arc::new(CascadeReasoner::new(SamplingSettings::default()))
    } else {
        Arc::new(build_from_config(&config))
    };

    let store = mentor_memory::build_store(&config.memory).await;
    let registry = Arc::new(default_registry(ActivityStore::new()));
    let orchestrator = Orchestrator::new(reasoner, registry, store, &config);
    let session_id =
        session.unwrap_or_else(|| format!("cli-{}", chrono::Utc::now().timestamp_millis()));

    if !json {
        let mut progress = orchestrator.events().subscribe();
        tokio::spawn(async move {
            loop {
                match progress.recv().await {
                    Ok(update) => {
                        if let Some(description) = &update.description {
                            eprintln!("  … {description}");
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    let (comprehension, plan) = orchestrator.comprehend(request, &session_id, user).await;
    if !json {
        println!();
        println!("  Mentor > {}", comprehension.initial_response);
        println!();
        println!("  Plano:");
        for line in plan.outline().lines() {
            println!("    {line}");
        }
        println!();
    }

    let turn = if offline {
        orchestrator.run_pipeline(&plan, &session_id, user).await
    } else {
        orchestrator.execute(&plan, &session_id, user).await
    };

    if json {
        let output = serde_json::json!({
            "session_id": session_id,
            "comprehension": comprehension,
            "plan": plan,
            "turn": turn,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_turn(&turn);
    }

    Ok(())
}

fn print_turn(turn: &TurnReport) {
    println!();
    for line in turn.final_response.lines() {
        println!("  Mentor > {line}");
    }
    println!();

    let m = &turn.metrics;
    println!(
        "  {} iterações · {} capabilities ({} em paralelo) · {} chamadas de IA · {} ms",
        m.iterations_used,
        m.capabilities_executed,
        m.parallel_executions,
        m.ai_calls,
        m.total_duration_ms
    );
    if let Some(verification) = &turn.verification {
        println!("  Verificação: {}/100", verification.score);
    }
    println!();
}
