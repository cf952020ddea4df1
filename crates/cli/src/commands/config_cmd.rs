//! `mentor config`: Configuration management commands.

use anyhow::Context;
use mentor_config::AppConfig;

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

pub fn init(force: bool) -> anyhow::Result<()> {
    let path = config_path();
    if path.exists() && !force {
        println!("⚠️  Config already exists at: {}", path.display());
        println!("   Edit it manually or re-run with --force.");
        return Ok(());
    }

    std::fs::create_dir_all(AppConfig::config_dir())
        .with_context(|| format!("Failed to create {}", AppConfig::config_dir().display()))?;
    std::fs::write(&path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("✅ Created config.toml at: {}", path.display());
    println!();
    println!("📝 Next steps:");
    println!("   1. Add your API key to {} (or set MENTOR_API_KEY)", path.display());
    println!("   2. Run: mentor run \"crie uma atividade de matemática para o 7º ano\"");
    Ok(())
}

pub fn show() -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;
    redact(&mut config);
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path() {
    println!("{}", config_path().display());
}

pub fn validate() -> anyhow::Result<()> {
    println!("🔍 Validating configuration...");
    let config = AppConfig::load().context("Config error")?;
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if !mentor_providers::is_usable(&config) {
        warnings.push("No API key set; `mentor run` will work offline");
    }
    if !config.verifier.enabled {
        warnings.push("Verifier disabled; results are not graded");
    }
    if config.memory.backend == "none" {
        warnings.push("memory.backend = \"none\"; nothing is remembered across runs");
    }
    for w in &warnings {
        println!("   ⚠️  {w}");
    }

    println!();
    println!("   Provider:   {}", config.default_provider);
    println!("   Model:      {}", config.default_model);
    println!("   Fallbacks:  {}", config.fallback_chain.join(", "));
    println!("   Memory:     {}", config.memory.backend);
    println!(
        "   Loop:       {} iterations, {} ms",
        config.agent.max_iterations, config.agent.timeout_ms
    );
    Ok(())
}

/// Hide API keys before printing.
fn redact(config: &mut AppConfig) {
    let hidden = || Some("[REDACTED]".to_string());
    if config.api_key.is_some() {
        config.api_key = hidden();
    }
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = hidden();
        }
    }
}
