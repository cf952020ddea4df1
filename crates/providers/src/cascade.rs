//! Reasoning cascade: ordered provider chain with per-provider timeouts.
//!
//! When a provider fails (timeout, rate limit, error, blank output) the next
//! entry in the chain is tried. The cascade never returns an error; callers
//! get a [`ReasoningOutcome`] listing every failed attempt.

use async_trait::async_trait;
use mentor_core::provider::{Provider, ProviderRequest, Reasoner, ReasoningOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// A single entry in the cascade.
struct CascadeEntry {
    provider: Arc<dyn Provider>,
    model: String,
    timeout: Duration,
}

/// Sampling settings applied to every request of the cascade.
#[derive(Debug, Clone)]
pub struct SamplingSettings {
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            system: None,
            temperature: 0.7,
            max_tokens: Some(4096),
        }
    }
}

/// A [`Reasoner`] over an ordered list of providers.
pub struct CascadeReasoner {
    chain: Vec<CascadeEntry>,
    sampling: SamplingSettings,
}

impl CascadeReasoner {
    pub fn new(sampling: SamplingSettings) -> Self {
        Self {
            chain: Vec::new(),
            sampling,
        }
    }

    /// Add a provider and the model to request from it.
    pub fn add(
        mut self,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        self.chain.push(CascadeEntry {
            provider,
            model: model.into(),
            timeout,
        });
        self
    }

    /// Add a provider with the default timeout (120s).
    pub fn add_default(self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.add(provider, model, DEFAULT_TIMEOUT)
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Provider names in cascade order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.chain.iter().map(|e| e.provider.name()).collect()
    }

    fn request_for(&self, entry: &CascadeEntry, prompt: &str) -> ProviderRequest {
        ProviderRequest {
            model: entry.model.clone(),
            system: self.sampling.system.clone(),
            prompt: prompt.to_string(),
            temperature: self.sampling.temperature,
            max_tokens: self.sampling.max_tokens,
        }
    }
}

#[async_trait]
impl Reasoner for CascadeReasoner {
    async fn reason(&self, prompt: &str) -> ReasoningOutcome {
        let mut errors = Vec::new();
        let mut attempts = 0u32;

        for entry in &self.chain {
            let provider_name = entry.provider.name().to_string();
            attempts += 1;

            info!(
                provider = %provider_name,
                model = %entry.model,
                attempt = attempts,
                total = self.chain.len(),
                "Cascade: trying provider"
            );

            let request = self.request_for(entry, prompt);
            match tokio::time::timeout(entry.timeout, entry.provider.complete(request)).await {
                Ok(Ok(response)) if !response.text.trim().is_empty() => {
                    return ReasoningOutcome::succeeded(
                        response.text,
                        provider_name,
                        response.model,
                        attempts,
                        errors,
                    );
                }
                Ok(Ok(_)) => {
                    warn!(provider = %provider_name, "Cascade: blank response, trying next");
                    errors.push(format!("{provider_name}: empty response"));
                }
                Ok(Err(e)) => {
                    warn!(
                        provider = %provider_name,
                        error = %e,
                        "Cascade: provider failed, trying next"
                    );
                    errors.push(format!("{provider_name}: {e}"));
                }
                Err(_) => {
                    warn!(
                        provider = %provider_name,
                        timeout_secs = entry.timeout.as_secs(),
                        "Cascade: provider timed out, trying next"
                    );
                    errors.push(format!(
                        "{provider_name}: timed out after {}s",
                        entry.timeout.as_secs()
                    ));
                }
            }
        }

        if self.chain.is_empty() {
            errors.push("no providers configured".into());
        }
        ReasoningOutcome::failed(attempts, errors)
    }
}
