//! Provider router: builds the reasoning cascade from configuration.
//!
//! The default provider comes first, followed by `fallback_chain` in order.
//! Each entry resolves its key, base URL, model and timeout from its
//! `[providers.<name>]` section, falling back to the top-level settings.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mentor_config::{AppConfig, ProviderConfig};
use mentor_core::provider::Provider;

use crate::cascade::{CascadeReasoner, SamplingSettings};
use crate::openai_compat::OpenAiCompatProvider;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Providers that answer without an API key.
const KEYLESS: &[&str] = &["ollama", "vllm", "llamacpp", "llama.cpp"];

/// Build the reasoning cascade described by `config`.
pub fn build_from_config(config: &AppConfig) -> CascadeReasoner {
    let sampling = SamplingSettings {
        system: None,
        temperature: config.default_temperature,
        max_tokens: Some(config.default_max_tokens),
    };
    let mut cascade = CascadeReasoner::new(sampling);

    let mut seen = HashSet::new();
    let names = std::iter::once(&config.default_provider).chain(config.fallback_chain.iter());
    for name in names {
        if !seen.insert(name.as_str()) {
            continue;
        }

        let provider_config = config.providers.get(name).cloned().unwrap_or_default();
        let provider = build_provider(name, &provider_config, config);
        let model = provider_config
            .model
            .clone()
            .unwrap_or_else(|| config.default_model.clone());
        let timeout = Duration::from_secs(provider_config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

        cascade = cascade.add(provider, model, timeout);
    }

    cascade
}

/// Whether any provider in the cascade can be called.
///
/// Keyless local providers count as usable.
pub fn is_usable(config: &AppConfig) -> bool {
    config.has_api_key()
        || std::iter::once(&config.default_provider)
            .chain(config.fallback_chain.iter())
            .any(|name| KEYLESS.contains(&name.as_str()))
}

fn build_provider(name: &str, provider: &ProviderConfig, config: &AppConfig) -> Arc<dyn Provider> {
    let api_key = provider
        .api_key
        .clone()
        .or_else(|| config.api_key.clone())
        .unwrap_or_default();

    let base_url = provider
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(name));

    Arc::new(OpenAiCompatProvider::new(name, base_url, api_key))
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "fireworks" => "https://api.fireworks.ai/inference/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
